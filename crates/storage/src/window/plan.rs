#![forbid(unsafe_code)]

use crate::{IndexKey, IndexKind, KeyRange};
use dv_core::{ScanDirection, WindowRequest};

/// Resolved scan for one window request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowPlan {
    pub index: IndexKind,
    /// Direction the index is actually walked in.
    pub direction: ScanDirection,
    pub range: KeyRange,
    pub limit: usize,
    /// Key the scan continues from, if the request carried a previous window.
    pub pivot: Option<IndexKey>,
    /// Rows come back in scan order and are reversed before they are returned.
    pub reverse_output: bool,
}

/// Chooses the index, bounds and direction for `request`.
///
/// An active filter picks the filter column's composite index and pins the
/// scan to that value's region; otherwise the sort column's index is used.
/// An empty previous window is treated as no previous window, and so is a
/// pivot row outside the filter's region (the filter value changed).
pub fn plan_window(request: &WindowRequest) -> WindowPlan {
    let index = match &request.filter {
        Some(filter) => IndexKind::for_filter(filter.field),
        None => IndexKind::for_sort(request.sort_by),
    };
    let direction = request.effective_direction();

    let mut range = match &request.filter {
        Some(filter) => KeyRange::prefix(filter.value.clone()),
        None => KeyRange::full(),
    };

    let previous = request
        .previous_window
        .as_deref()
        .filter(|window| !window.is_empty());
    let pivot = previous.and_then(|window| {
        let row = if request.invert {
            window.first()
        } else {
            window.last()
        }?;
        match &request.filter {
            Some(filter) if !filter.matches(row) => None,
            _ => Some(index.key_of(row)),
        }
    });

    if let Some(key) = &pivot {
        range = match direction {
            ScanDirection::Forward => range.after(key.clone()),
            ScanDirection::Backward => range.before(key.clone()),
        };
    }

    WindowPlan {
        index,
        direction,
        range,
        limit: request.effective_limit(),
        pivot,
        reverse_output: request.invert,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dv_core::{Filter, FilterField, Record, SortColumn};
    use std::ops::Bound;

    #[test]
    fn first_page_scans_whole_sort_index() {
        let plan = plan_window(&WindowRequest {
            sort_by: SortColumn::ObjectType,
            ..WindowRequest::default()
        });
        assert_eq!(plan.index, IndexKind::ObjectType);
        assert!(plan.range.is_unbounded());
        assert_eq!(plan.pivot, None);
        assert_eq!(plan.limit, 10);
    }

    #[test]
    fn filter_with_empty_previous_window_starts_inside_region() {
        let plan = plan_window(&WindowRequest {
            filter: Some(Filter::new(FilterField::ChangeType, "changed")),
            previous_window: Some(Vec::new()),
            ..WindowRequest::default()
        });
        assert_eq!(plan.index, IndexKind::ChangeType);
        assert_eq!(plan.range, KeyRange::prefix("changed"));
        assert_eq!(plan.pivot, None);
    }

    #[test]
    fn pivot_outside_filter_region_is_dropped() {
        let plan = plan_window(&WindowRequest {
            filter: Some(Filter::new(FilterField::ChangeType, "changed")),
            previous_window: Some(vec![Record::new("b", "user", "deleted")]),
            ..WindowRequest::default()
        });
        assert_eq!(plan.pivot, None);
        assert_eq!(plan.range, KeyRange::prefix("changed"));
    }

    #[test]
    fn inverted_request_pivots_on_first_row_and_flips() {
        let window = vec![
            Record::new("b", "user", "changed"),
            Record::new("c", "user", "changed"),
        ];
        let plan = plan_window(&WindowRequest {
            previous_window: Some(window),
            invert: true,
            ..WindowRequest::default()
        });
        assert_eq!(plan.direction, ScanDirection::Backward);
        assert_eq!(plan.pivot, Some(IndexKey::primary("b")));
        assert_eq!(plan.range.upper, Bound::Excluded(IndexKey::primary("b")));
        assert_eq!(plan.range.lower, Bound::Unbounded);
        assert!(plan.reverse_output);
    }

    #[test]
    fn forward_request_pivots_on_last_row() {
        let window = vec![
            Record::new("a", "user", "changed"),
            Record::new("b", "group", "deleted"),
        ];
        let plan = plan_window(&WindowRequest {
            sort_by: SortColumn::ChangeType,
            previous_window: Some(window),
            ..WindowRequest::default()
        });
        assert_eq!(
            plan.range.lower,
            Bound::Excluded(IndexKey::composite("deleted", "b"))
        );
    }
}
