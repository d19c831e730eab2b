#![forbid(unsafe_code)]

use crate::StoreError;
use dv_core::Record;

/// Write side used by the ingestion batcher.
///
/// One call writes one batch: either every record of the batch is stored or
/// the call fails and none of them are.
pub trait BatchSink {
    fn put_batch(&mut self, records: &[Record]) -> Result<usize, StoreError>;
}
