#![forbid(unsafe_code)]

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// The file holds a dataset this build cannot read; it must be recreated.
    #[error("reset required: {0}")]
    ResetRequired(&'static str),
    #[error("dataset missing: {dataset}")]
    DatasetMissing { dataset: String },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO",
            Self::Sql(_) => "SQLITE",
            Self::Json(_) => "JSON",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ResetRequired(_) => "RESET_REQUIRED",
            Self::DatasetMissing { .. } => "DATASET_MISSING",
        }
    }
}
