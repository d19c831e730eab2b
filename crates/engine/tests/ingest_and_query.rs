use dv_core::{Filter, FilterField, Record, SortColumn, WindowRequest};
use dv_engine::{EngineConfig, IngestOptions, Session, ingest_stream};
use dv_storage::{BatchSink, IndexKind, StoreError};
use std::io::{Cursor, Read};
use tempfile::TempDir;

fn session_in(dir: &TempDir) -> Session {
    let config = EngineConfig {
        storage_dir: dir.path().to_path_buf(),
        batch_size: 4,
        chunk_capacity: 64,
        ..EngineConfig::default()
    };
    config.validate().expect("valid config");
    Session::new(config)
}

fn element(name: &str, object_type: &str, change_type: &str) -> String {
    format!(
        r#"{{"obj_name":"{name}","obj_type":"{object_type}","change_type":"{change_type}",
            "all_attributes":{{"mail":{{"backup_values":["a@x"],"ldap_values":["b@x"]}}}},
            "changed_attributes":{{"mail":"0"}}}}"#
    )
}

fn array_payload(elements: &[String]) -> String {
    format!("[{}]", elements.join(","))
}

fn generated(n: usize) -> Vec<String> {
    let types = ["person", "group", "container"];
    let changes = ["changed", "deleted", "moved"];
    (0..n)
        .map(|i| {
            element(
                &format!("uid=user{i:04},cn=users,cn=accounts,dc=example,dc=test"),
                types[i % 3],
                changes[(i / 3) % 3],
            )
        })
        .collect()
}

fn names(records: &[Record]) -> Vec<String> {
    records.iter().map(|r| r.name.clone()).collect()
}

#[test]
fn abc_scenario_through_the_session() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut session = session_in(&dir);
    let payload = array_payload(&[
        element("a", "person", "changed"),
        element("b", "person", "deleted"),
        element("c", "group", "changed"),
    ]);
    let report = session
        .ingest_reader(Cursor::new(payload))
        .expect("ingest")
        .expect("current");
    assert_eq!(report.records_written, 3);
    assert_eq!(report.skipped_malformed, 0);

    let request = WindowRequest {
        sort_by: SortColumn::Name,
        limit: 2,
        ..WindowRequest::default()
    };
    let first = session.fetch(&request).expect("fetch").expect("current");
    assert_eq!(names(&first.records), ["a", "b"]);
    assert_eq!(first.total_count, 3);
    assert_eq!(first.filtered_count, 3);

    let second = session
        .fetch(&request.continue_from(&first.records, false))
        .expect("fetch")
        .expect("current");
    assert_eq!(names(&second.records), ["c"]);
    let third = session
        .fetch(&request.continue_from(&second.records, false))
        .expect("fetch")
        .expect("current");
    assert_eq!(names(&third.records), ["c"]);
    assert!(third.at_edge);

    let filtered = session
        .fetch(&WindowRequest {
            limit: 10,
            filter: Some(Filter::new(FilterField::ChangeType, "changed")),
            ..WindowRequest::default()
        })
        .expect("fetch")
        .expect("current");
    assert_eq!(names(&filtered.records), ["a", "c"]);
    assert_eq!(filtered.filtered_count, 2);

    let detail = session.record("a").expect("get").expect("present");
    assert!(detail.changed_attributes.contains("mail"));
    assert!(detail.attributes.is_some());
}

#[test]
fn ingestion_is_complete_and_replaces_the_previous_generation() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut session = session_in(&dir);

    session
        .ingest_reader(Cursor::new(array_payload(&generated(37))))
        .expect("first run")
        .expect("current");
    assert_eq!(session.total_count().expect("count"), 37);
    assert_eq!(session.generation(), 1);

    let report = session
        .ingest_reader(Cursor::new(array_payload(&generated(11))))
        .expect("second run")
        .expect("current");
    assert_eq!(report.records_written, 11);
    assert_eq!(report.batches_written, 3);
    assert_eq!(session.total_count().expect("count"), 11);
    assert_eq!(session.projection().len(), 11);
    assert_eq!(session.generation(), 2);

    let histogram = session.histogram(IndexKind::ObjectType).expect("histogram");
    let total: u64 = histogram.iter().map(|(_, n)| n).sum();
    assert_eq!(total, 11);
}

#[test]
fn projection_serves_the_same_windows_as_the_store() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut session = session_in(&dir);
    session
        .ingest_reader(Cursor::new(array_payload(&generated(25))))
        .expect("ingest")
        .expect("current");

    let request = WindowRequest {
        sort_by: SortColumn::ObjectType,
        limit: 7,
        filter: Some(Filter::new(FilterField::ChangeType, "moved")),
        ..WindowRequest::default()
    };
    let from_store = session.fetch(&request).expect("fetch").expect("current");
    let from_memory = session
        .fetch_projected(&request)
        .expect("fetch")
        .expect("current");
    assert_eq!(names(&from_store.records), names(&from_memory.records));
    assert_eq!(from_store.filtered_count, from_memory.filtered_count);
}

#[test]
fn reopened_session_reads_existing_dataset_and_hydrates_projection() {
    let dir = tempfile::tempdir().expect("temp dir");
    {
        let mut session = session_in(&dir);
        session
            .ingest_reader(Cursor::new(array_payload(&generated(9))))
            .expect("ingest")
            .expect("current");
        session.close().expect("close");
    }

    let mut session = session_in(&dir);
    assert!(session.projection().is_empty());
    assert_eq!(session.hydrate_projection().expect("hydrate"), 9);
    let page = session
        .fetch_projected(&WindowRequest::default())
        .expect("fetch")
        .expect("current");
    assert_eq!(page.total_count, 9);
    assert!(session.created_at().expect("meta").is_some());
}

#[test]
fn query_without_dataset_fails_with_missing() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut session = session_in(&dir);
    let err = session
        .fetch(&WindowRequest::default())
        .expect_err("no dataset yet");
    assert_eq!(err.code(), "DATASET_MISSING");
}

#[test]
fn malformed_elements_and_envelope_metadata_are_reported() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut session = session_in(&dir);
    let payload = format!(
        r#"{{"generated_at":"2026-01-07T21:23:13Z","result":[{},{{"obj_name":}},{}],"count":3}}"#,
        element("x", "person", "moved"),
        element("y", "group", "changed"),
    );
    let report = session
        .ingest_reader(Cursor::new(payload))
        .expect("ingest")
        .expect("current");
    assert_eq!(report.records_written, 2);
    assert_eq!(report.skipped_malformed, 1);
    let keys: Vec<&str> = report.metadata.iter().map(|m| m.key.as_str()).collect();
    assert_eq!(keys, ["generated_at", "count"]);
}

/// Errors after `limit` bytes.
struct BrokenReader {
    inner: Cursor<Vec<u8>>,
    limit: u64,
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.inner.position() >= self.limit {
            return Err(std::io::Error::other("connection reset"));
        }
        let room = usize::try_from(self.limit - self.inner.position()).unwrap_or(usize::MAX);
        let cap = buf.len().min(room);
        self.inner.read(&mut buf[..cap])
    }
}

#[test]
fn source_failure_before_first_byte_is_an_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut session = session_in(&dir);
    let reader = BrokenReader {
        inner: Cursor::new(Vec::new()),
        limit: 0,
    };
    let err = session.ingest_reader(reader).expect_err("nothing to read");
    assert_eq!(err.code(), "SOURCE");
}

#[test]
fn source_failure_mid_stream_keeps_what_was_parsed() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut session = session_in(&dir);
    let payload = array_payload(&generated(20)).into_bytes();
    let cut = payload.len() as u64 / 2;
    let reader = BrokenReader {
        inner: Cursor::new(payload),
        limit: cut,
    };
    let report = session
        .ingest_reader(reader)
        .expect("absorbed")
        .expect("current");
    assert!(report.source_error.is_some());
    assert!(report.records_written > 0);
    assert!(report.records_written < 20);
    assert_eq!(
        session.total_count().expect("count"),
        report.records_written
    );
}

/// Fails every `nth` batch.
struct FlakySink {
    calls: usize,
    nth: usize,
    stored: Vec<String>,
}

impl BatchSink for FlakySink {
    fn put_batch(&mut self, records: &[Record]) -> Result<usize, StoreError> {
        self.calls += 1;
        if self.calls % self.nth == 0 {
            return Err(StoreError::InvalidInput("injected batch failure"));
        }
        self.stored.extend(records.iter().map(|r| r.name.clone()));
        Ok(records.len())
    }
}

#[test]
fn failed_batches_are_counted_and_ingestion_continues() {
    let mut sink = FlakySink {
        calls: 0,
        nth: 2,
        stored: Vec::new(),
    };
    let options = IngestOptions {
        batch_size: 5,
        chunk_capacity: 100,
        ..IngestOptions::default()
    };
    let gate = dv_core::RequestGate::new();
    let token = gate.issue();
    let report = ingest_stream(
        Cursor::new(array_payload(&generated(20))),
        &mut sink,
        None,
        &options,
        &token,
    )
    .expect("ingest")
    .expect("current");
    assert_eq!(report.records_parsed, 20);
    assert_eq!(report.failed_batches, 2);
    assert_eq!(report.lost_records, 10);
    assert_eq!(report.records_written, 10);
    assert_eq!(sink.stored.len(), 10);
}

/// Supersedes the running ingestion once `after` reads have happened.
struct SupersedingReader {
    inner: Cursor<Vec<u8>>,
    gate: dv_core::RequestGate,
    reads: usize,
    after: usize,
}

impl Read for SupersedingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.reads += 1;
        if self.reads == self.after {
            self.gate.issue();
        }
        self.inner.read(buf)
    }
}

#[test]
fn superseded_ingestion_delivers_no_report() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut session = session_in(&dir);
    let reader = SupersedingReader {
        inner: Cursor::new(array_payload(&generated(30)).into_bytes()),
        gate: session.ingest_gate(),
        reads: 0,
        after: 2,
    };
    let outcome = session.ingest_reader(reader).expect("no error");
    assert!(outcome.is_none());
}

#[test]
fn superseded_query_delivers_nothing() {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut session = session_in(&dir);
    session
        .ingest_reader(Cursor::new(array_payload(&generated(3))))
        .expect("ingest")
        .expect("current");

    let stale = session.begin_query();
    let fresh = session.begin_query();
    assert!(stale.deliver(()).is_none());
    assert!(fresh.deliver(()).is_some());

    // A query issued elsewhere on the shared gate supersedes this caller's token.
    let gate = session.query_gate();
    let mine = session.begin_query();
    gate.issue();
    assert!(!mine.is_current());
    assert!(session.fetch(&WindowRequest::default()).expect("fetch").is_some());
}
