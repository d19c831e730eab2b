#![forbid(unsafe_code)]

mod index;
mod projection;
mod sink;
mod store;
mod window;

pub use index::{IndexKey, IndexKind, IndexedStore, KeyRange};
pub use projection::{ProjectionEntry, ProjectionHandle, ProjectionIndex};
pub use sink::BatchSink;
pub use store::{SCHEMA_VERSION, SqliteStore, StoreError, is_valid_dataset_name};
pub use window::{CountCache, WindowPlan, fetch_window, plan_window};
