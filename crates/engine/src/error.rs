#![forbid(unsafe_code)]

use dv_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("byte source unavailable: {0}")]
    Source(#[source] std::io::Error),
    #[error("http {url}: {message}")]
    Http { url: String, message: String },
    #[error("generator reported failure: {0}")]
    Generator(String),
    #[error("config: {0}")]
    Config(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(err) => err.code(),
            Self::Source(_) => "SOURCE",
            Self::Http { .. } => "HTTP",
            Self::Generator(_) => "GENERATOR",
            Self::Config(_) => "CONFIG",
        }
    }

    pub(crate) fn http(url: &str, err: impl std::fmt::Display) -> Self {
        Self::Http {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}
