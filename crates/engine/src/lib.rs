#![forbid(unsafe_code)]

mod batcher;
mod config;
mod error;
mod parser;
mod pipeline;
mod session;
mod source;

pub use batcher::{BatchStats, Batcher};
pub use config::{
    DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_CAPACITY, DEFAULT_DATASET, DEFAULT_GENERATOR_URL,
    DEFAULT_RECORDS_FIELD, DEFAULT_STORAGE_DIR, EngineConfig, MAX_BATCH_SIZE, MAX_CHUNK_CAPACITY,
};
pub use error::EngineError;
pub use parser::{MetaField, ParserStats, RecordParser};
pub use pipeline::{IngestOptions, IngestReport, ingest_stream};
pub use session::Session;
pub use source::{ChunkReader, open_http, trigger_generation};
