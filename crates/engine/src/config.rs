#![forbid(unsafe_code)]

use crate::EngineError;
use crate::pipeline::IngestOptions;
use dv_storage::is_valid_dataset_name;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_STORAGE_DIR: &str = ".diffview";
pub const DEFAULT_DATASET: &str = "StreamDataDB";
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_CAPACITY: usize = 128 * 1024;
pub const DEFAULT_RECORDS_FIELD: &str = "result";
pub const DEFAULT_GENERATOR_URL: &str = "http://localhost:4000/api/data";

pub const MAX_BATCH_SIZE: usize = 50_000;
pub const MAX_CHUNK_CAPACITY: usize = 64 * 1024 * 1024;

const ENV_STORAGE_DIR: &str = "DIFFVIEW_STORAGE_DIR";
const ENV_DATASET: &str = "DIFFVIEW_DATASET";
const ENV_BATCH_SIZE: &str = "DIFFVIEW_BATCH_SIZE";
const ENV_CHUNK_CAPACITY: &str = "DIFFVIEW_CHUNK_CAPACITY";
const ENV_RECORDS_FIELD: &str = "DIFFVIEW_RECORDS_FIELD";
const ENV_GENERATOR_URL: &str = "DIFFVIEW_GENERATOR_URL";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub storage_dir: PathBuf,
    pub dataset: String,
    pub batch_size: usize,
    pub chunk_capacity: usize,
    /// Name of the array field holding records when the payload root is an object.
    pub records_field: String,
    pub generator_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            dataset: DEFAULT_DATASET.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            records_field: DEFAULT_RECORDS_FIELD.to_string(),
            generator_url: DEFAULT_GENERATOR_URL.to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults, then `path` (if any), then process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            EngineError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, EngineError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
            .map_err(|err| EngineError::Config(format!("config must be valid YAML: {err}")))
    }

    /// Applies overrides from `lookup` (normally the process environment).
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), EngineError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = get(ENV_STORAGE_DIR) {
            self.storage_dir = PathBuf::from(value);
        }
        if let Some(value) = get(ENV_DATASET) {
            self.dataset = value;
        }
        if let Some(value) = get(ENV_BATCH_SIZE) {
            self.batch_size = parse_usize(ENV_BATCH_SIZE, &value)?;
        }
        if let Some(value) = get(ENV_CHUNK_CAPACITY) {
            self.chunk_capacity = parse_usize(ENV_CHUNK_CAPACITY, &value)?;
        }
        if let Some(value) = get(ENV_RECORDS_FIELD) {
            self.records_field = value;
        }
        if let Some(value) = get(ENV_GENERATOR_URL) {
            self.generator_url = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(EngineError::Config(format!(
                "batch_size must be in 1..={MAX_BATCH_SIZE}"
            )));
        }
        if !(1..=MAX_CHUNK_CAPACITY).contains(&self.chunk_capacity) {
            return Err(EngineError::Config(format!(
                "chunk_capacity must be in 1..={MAX_CHUNK_CAPACITY}"
            )));
        }
        if !is_valid_dataset_name(&self.dataset) {
            return Err(EngineError::Config(
                "dataset must be non-empty and use only [A-Za-z0-9._-]".to_string(),
            ));
        }
        if self.records_field.is_empty() {
            return Err(EngineError::Config(
                "records_field must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            batch_size: self.batch_size,
            chunk_capacity: self.chunk_capacity,
            records_field: self.records_field.clone(),
        }
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize, EngineError> {
    value
        .parse::<usize>()
        .map_err(|_| EngineError::Config(format!("{key} must be a non-negative integer")))
}
