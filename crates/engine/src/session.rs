#![forbid(unsafe_code)]

use crate::pipeline::{IngestReport, ingest_stream};
use crate::source::{open_http, trigger_generation};
use crate::{EngineConfig, EngineError};
use dv_core::{Record, RequestGate, RequestToken, ScanDirection, WindowRequest, WindowResponse};
use dv_storage::{
    CountCache, IndexKind, IndexedStore, KeyRange, ProjectionHandle, SqliteStore, fetch_window,
};
use std::io::Read;
use std::ops::ControlFlow;

const HYDRATE_BATCH: usize = 4096;

/// Caller-owned context for one dataset: the open store session, the count
/// caches, the projection index and the cancellation gates.
///
/// Everything here belongs to the current dataset generation and is reset
/// when a new ingestion run starts.
pub struct Session {
    config: EngineConfig,
    store: Option<SqliteStore>,
    counts: CountCache,
    projected_counts: CountCache,
    projection: ProjectionHandle,
    ingest_gate: RequestGate,
    query_gate: RequestGate,
    generation: u64,
}

impl Session {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            counts: CountCache::new(),
            projected_counts: CountCache::new(),
            projection: ProjectionHandle::new(),
            ingest_gate: RequestGate::new(),
            query_gate: RequestGate::new(),
            generation: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn projection(&self) -> &ProjectionHandle {
        &self.projection
    }

    /// Shared gate; issuing from a clone supersedes the running ingestion.
    pub fn ingest_gate(&self) -> RequestGate {
        self.ingest_gate.clone()
    }

    pub fn query_gate(&self) -> RequestGate {
        self.query_gate.clone()
    }

    pub fn begin_ingest(&self) -> RequestToken {
        self.ingest_gate.issue()
    }

    pub fn begin_query(&self) -> RequestToken {
        self.query_gate.issue()
    }

    /// Replaces the dataset with the records streamed from `reader`.
    ///
    /// Returns `Ok(None)` if another ingestion was started before this one
    /// finished.
    pub fn ingest_reader<R: Read>(
        &mut self,
        reader: R,
    ) -> Result<Option<IngestReport>, EngineError> {
        let token = self.begin_ingest();
        self.close_store()?;
        self.start_generation();

        let mut store = SqliteStore::recreate(&self.config.storage_dir, &self.config.dataset)?;
        let result = ingest_stream(
            reader,
            &mut store,
            Some(self.projection.clone()),
            &self.config.ingest_options(),
            &token,
        );
        self.store = Some(store);
        result
    }

    /// Opens the payload at `url` (the configured generator URL if `None`)
    /// and ingests it. The previous dataset is kept if the URL cannot be opened.
    pub fn ingest_url(&mut self, url: Option<&str>) -> Result<Option<IngestReport>, EngineError> {
        let url = url.unwrap_or(&self.config.generator_url).to_string();
        let reader = open_http(&url)?;
        self.ingest_reader(reader)
    }

    /// Asks the configured generator for `count` new records.
    pub fn generate(&self, count: u64) -> Result<(), EngineError> {
        trigger_generation(&self.config.generator_url, count)
    }

    /// Next window from the store. `Ok(None)` if superseded by a newer query.
    pub fn fetch(
        &mut self,
        request: &WindowRequest,
    ) -> Result<Option<WindowResponse>, EngineError> {
        let token = self.begin_query();
        self.counts.sync_generation(self.generation);
        let store = open_slot(&mut self.store, &self.config)?;
        let response = fetch_window(&*store, &mut self.counts, request)?;
        Ok(token.deliver(response))
    }

    /// Same as [`Session::fetch`] but served from the in-memory projection.
    pub fn fetch_projected(
        &mut self,
        request: &WindowRequest,
    ) -> Result<Option<WindowResponse>, EngineError> {
        let token = self.begin_query();
        self.projected_counts.sync_generation(self.generation);
        let response = fetch_window(&self.projection, &mut self.projected_counts, request)?;
        Ok(token.deliver(response))
    }

    /// Full record, attributes included.
    pub fn record(&mut self, name: &str) -> Result<Option<Record>, EngineError> {
        Ok(self.ensure_store()?.get(name)?)
    }

    pub fn histogram(&mut self, index: IndexKind) -> Result<Vec<(String, u64)>, EngineError> {
        Ok(self.ensure_store()?.histogram(index)?)
    }

    pub fn total_count(&mut self) -> Result<u64, EngineError> {
        Ok(self
            .ensure_store()?
            .count(IndexKind::Primary, &KeyRange::full())?)
    }

    pub fn created_at(&mut self) -> Result<Option<String>, EngineError> {
        Ok(self.ensure_store()?.created_at()?)
    }

    /// Rebuilds the projection from the store, for datasets ingested by an
    /// earlier process.
    pub fn hydrate_projection(&mut self) -> Result<usize, EngineError> {
        let projection = self.projection.clone();
        projection.reset();
        let store = self.ensure_store()?;
        let mut batch = Vec::with_capacity(HYDRATE_BATCH);
        store.visit(
            IndexKind::Primary,
            &KeyRange::full(),
            ScanDirection::Forward,
            &mut |record| {
                batch.push(record);
                if batch.len() >= HYDRATE_BATCH {
                    projection.publish(&batch);
                    batch.clear();
                }
                ControlFlow::Continue(())
            },
        )?;
        projection.publish(&batch);
        self.projected_counts.invalidate();
        Ok(projection.len())
    }

    /// Ends the store session and cancels outstanding requests.
    pub fn close(&mut self) -> Result<(), EngineError> {
        self.ingest_gate.cancel_all();
        self.query_gate.cancel_all();
        self.close_store()
    }

    fn ensure_store(&mut self) -> Result<&mut SqliteStore, EngineError> {
        open_slot(&mut self.store, &self.config)
    }

    fn close_store(&mut self) -> Result<(), EngineError> {
        if let Some(store) = self.store.take() {
            tracing::debug!(dataset = store.dataset(), "closing store session");
            store.close()?;
        }
        Ok(())
    }

    fn start_generation(&mut self) {
        self.generation += 1;
        self.counts.sync_generation(self.generation);
        self.projected_counts.sync_generation(self.generation);
        self.projection.reset();
    }
}

/// Opens the configured dataset on first use.
fn open_slot<'a>(
    slot: &'a mut Option<SqliteStore>,
    config: &EngineConfig,
) -> Result<&'a mut SqliteStore, EngineError> {
    let store = match slot.take() {
        Some(store) => store,
        None => SqliteStore::open(&config.storage_dir, &config.dataset)?,
    };
    Ok(slot.insert(store))
}
