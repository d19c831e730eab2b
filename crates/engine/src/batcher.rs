#![forbid(unsafe_code)]

use dv_core::Record;
use dv_storage::{BatchSink, ProjectionHandle};
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub batches_written: u64,
    pub records_written: u64,
    pub failed_batches: u64,
    pub lost_records: u64,
}

/// Groups records into size-bounded batches and writes them one at a time.
///
/// A batch that fails to write is logged and counted as lost; later batches
/// are still written. Successful batches are published to the projection, if
/// one is attached.
pub struct Batcher<'a, S: BatchSink + ?Sized> {
    sink: &'a mut S,
    batch_size: usize,
    pending: Vec<Record>,
    projection: Option<ProjectionHandle>,
    stats: BatchStats,
}

impl<'a, S: BatchSink + ?Sized> Batcher<'a, S> {
    pub fn new(sink: &'a mut S, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            batch_size,
            pending: Vec::with_capacity(batch_size.min(8192)),
            projection: None,
            stats: BatchStats::default(),
        }
    }

    pub fn with_projection(mut self, projection: ProjectionHandle) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn accept(&mut self, record: Record) {
        self.pending.push(record);
        if self.pending.len() >= self.batch_size {
            self.flush();
        }
    }

    /// Writes the partial batch, if any.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = self.stats.batches_written + self.stats.failed_batches + 1;
        let records = self.pending.len() as u64;
        match self.sink.put_batch(&self.pending) {
            Ok(_) => {
                self.stats.batches_written += 1;
                self.stats.records_written += records;
                if let Some(projection) = &self.projection {
                    projection.publish(&self.pending);
                }
                tracing::debug!(batch, records, "batch written");
            }
            Err(err) => {
                self.stats.failed_batches += 1;
                self.stats.lost_records += records;
                tracing::warn!(batch, records, error = %err, code = err.code(), "batch write failed");
            }
        }
        self.pending.clear();
    }

    /// Flushes the remainder and returns the totals.
    pub fn drain(mut self) -> BatchStats {
        self.flush();
        self.stats
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
