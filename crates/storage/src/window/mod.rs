#![forbid(unsafe_code)]

mod counts;
mod plan;

pub use counts::CountCache;
pub use plan::{WindowPlan, plan_window};

use crate::{IndexedStore, StoreError};
use dv_core::{WindowCursor, WindowRequest, WindowResponse};

/// Computes the next bounded window for `request`.
///
/// Rows are returned in the orientation of `request.direction`; an inverted
/// request scans the other way and reverses the result. When the scan runs
/// past either end of the region, the previous window is returned unchanged
/// with `at_edge` set, provided its rows still satisfy the filter.
pub fn fetch_window<S: IndexedStore + ?Sized>(
    store: &S,
    counts: &mut CountCache,
    request: &WindowRequest,
) -> Result<WindowResponse, StoreError> {
    let plan = plan_window(request);
    let mut records = store.scan(plan.index, &plan.range, plan.direction, plan.limit)?;
    if plan.reverse_output {
        records.reverse();
    }
    tracing::debug!(
        index = plan.index.as_str(),
        direction = plan.direction.as_str(),
        limit = plan.limit,
        rows = records.len(),
        "window scanned"
    );

    let mut at_edge = false;
    if records.is_empty()
        && let Some(previous) = request.previous_window.as_ref()
        && !previous.is_empty()
    {
        at_edge = true;
        let in_region = request
            .filter
            .as_ref()
            .is_none_or(|filter| previous.iter().all(|row| filter.matches(row)));
        if in_region {
            records = previous.clone();
        }
    }

    let (total_count, filtered_count) = counts.resolve(store, request.filter.as_ref())?;

    Ok(WindowResponse {
        cursor: WindowCursor::of(&records),
        records,
        total_count,
        filtered_count,
        at_edge,
        echoed_config: request.echo(),
    })
}
