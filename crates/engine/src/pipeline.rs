#![forbid(unsafe_code)]

use crate::batcher::Batcher;
use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_CHUNK_CAPACITY, DEFAULT_RECORDS_FIELD};
use crate::parser::{MetaField, RecordParser};
use crate::source::ChunkReader;
use crate::EngineError;
use dv_core::RequestToken;
use dv_storage::{BatchSink, ProjectionHandle};
use serde::Serialize;
use std::io::Read;
use std::time::Instant;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub chunk_capacity: usize,
    pub records_field: String,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            records_field: DEFAULT_RECORDS_FIELD.to_string(),
        }
    }
}

/// Outcome of one ingestion run. Conditions that were absorbed rather than
/// raised (malformed elements, failed batches, a source that broke mid-stream)
/// are counted here.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub records_parsed: u64,
    pub records_written: u64,
    pub skipped_malformed: u64,
    pub batches_written: u64,
    pub failed_batches: u64,
    pub lost_records: u64,
    pub bytes_read: u64,
    pub chunks_read: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<MetaField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub elapsed_ms: u64,
}

/// Streams `reader` through the parser and batcher into `sink`.
///
/// Returns `Ok(None)` when `token` is superseded while the run is in progress;
/// batches already written stay written. A read error before the first byte
/// is returned as [`EngineError::Source`]; a later one ends the run and is
/// recorded in the report.
pub fn ingest_stream<R, S>(
    reader: R,
    sink: &mut S,
    projection: Option<ProjectionHandle>,
    options: &IngestOptions,
    token: &RequestToken,
) -> Result<Option<IngestReport>, EngineError>
where
    R: Read,
    S: BatchSink + ?Sized,
{
    let started = Instant::now();
    let mut chunks = ChunkReader::new(reader, options.chunk_capacity);
    let mut parser = RecordParser::new(options.records_field.clone());
    let mut batcher = Batcher::new(sink, options.batch_size);
    if let Some(projection) = projection {
        batcher = batcher.with_projection(projection);
    }
    let mut source_error = None;

    tracing::info!(
        request = token.id(),
        batch_size = options.batch_size,
        chunk_capacity = chunks.capacity(),
        "ingestion started"
    );

    loop {
        if !token.is_current() {
            tracing::info!(request = token.id(), "ingestion superseded");
            return Ok(None);
        }
        let bytes_read = chunks.bytes_read();
        let chunk = match chunks.next_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) if bytes_read == 0 => return Err(EngineError::Source(err)),
            Err(err) => {
                tracing::warn!(error = %err, bytes_read, "byte source failed mid-stream");
                source_error = Some(err.to_string());
                break;
            }
        };
        for record in parser.feed(chunk) {
            batcher.accept(record);
        }
    }

    for record in parser.finish() {
        batcher.accept(record);
    }
    let batches = batcher.drain();
    let parsed = parser.stats();

    let report = IngestReport {
        records_parsed: parsed.records,
        records_written: batches.records_written,
        skipped_malformed: parsed.malformed,
        batches_written: batches.batches_written,
        failed_batches: batches.failed_batches,
        lost_records: batches.lost_records,
        bytes_read: chunks.bytes_read(),
        chunks_read: chunks.chunks(),
        metadata: parser.take_metadata(),
        source_error,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    };
    tracing::info!(
        request = token.id(),
        records = report.records_written,
        malformed = report.skipped_malformed,
        failed_batches = report.failed_batches,
        elapsed_ms = report.elapsed_ms,
        "ingestion finished"
    );
    Ok(token.deliver(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dv_core::{Record, RequestGate};
    use dv_storage::StoreError;
    use std::io::Cursor;

    #[derive(Default)]
    struct MemorySink {
        names: Vec<String>,
    }

    impl BatchSink for MemorySink {
        fn put_batch(&mut self, records: &[Record]) -> Result<usize, StoreError> {
            self.names.extend(records.iter().map(|r| r.name.clone()));
            Ok(records.len())
        }
    }

    fn payload(n: usize) -> String {
        let items: Vec<String> = (0..n)
            .map(|i| {
                format!(r#"{{"obj_name":"uid=u{i},dc=test","obj_type":"person","change_type":"moved"}}"#)
            })
            .collect();
        format!("[{}]", items.join(","))
    }

    #[test]
    fn small_chunks_and_batches_ingest_everything() {
        let gate = RequestGate::new();
        let token = gate.issue();
        let mut sink = MemorySink::default();
        let options = IngestOptions {
            batch_size: 3,
            chunk_capacity: 7,
            ..IngestOptions::default()
        };
        let report = ingest_stream(Cursor::new(payload(10)), &mut sink, None, &options, &token)
            .expect("ingest")
            .expect("current");
        assert_eq!(report.records_parsed, 10);
        assert_eq!(report.records_written, 10);
        assert_eq!(report.batches_written, 4);
        assert!(report.chunks_read > 10);
        assert_eq!(sink.names.len(), 10);
        assert_eq!(sink.names[9], "uid=u9,dc=test");
    }

    #[test]
    fn superseded_run_delivers_nothing() {
        let gate = RequestGate::new();
        let stale = gate.issue();
        let _fresh = gate.issue();
        let mut sink = MemorySink::default();
        let result = ingest_stream(
            Cursor::new(payload(2)),
            &mut sink,
            None,
            &IngestOptions::default(),
            &stale,
        )
        .expect("ingest");
        assert!(result.is_none());
    }
}
