#![forbid(unsafe_code)]

use crate::StoreError;
use dv_core::{FilterField, Record, ScanDirection, SortColumn};
use std::ops::{Bound, ControlFlow};

/// Orderings maintained over the record set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Primary key order: `name`.
    Primary,
    /// `(object_type, name)`.
    ObjectType,
    /// `(change_type, name)`.
    ChangeType,
}

impl IndexKind {
    pub fn for_sort(column: SortColumn) -> Self {
        match column {
            SortColumn::Name => Self::Primary,
            SortColumn::ObjectType => Self::ObjectType,
            SortColumn::ChangeType => Self::ChangeType,
        }
    }

    pub fn for_filter(field: FilterField) -> Self {
        match field {
            FilterField::ObjectType => Self::ObjectType,
            FilterField::ChangeType => Self::ChangeType,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::ObjectType => "object_type",
            Self::ChangeType => "change_type",
        }
    }

    pub fn is_composite(self) -> bool {
        !matches!(self, Self::Primary)
    }

    pub fn lead_of(self, record: &Record) -> Option<&str> {
        match self {
            Self::Primary => None,
            Self::ObjectType => Some(&record.object_type),
            Self::ChangeType => Some(&record.change_type),
        }
    }

    pub fn key_of(self, record: &Record) -> IndexKey {
        IndexKey {
            lead: self.lead_of(record).map(str::to_string),
            name: record.name.clone(),
        }
    }
}

/// Position inside one index: the leading column value (composite indexes
/// only) followed by the record name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey {
    pub lead: Option<String>,
    pub name: String,
}

impl IndexKey {
    pub fn primary(name: impl Into<String>) -> Self {
        Self {
            lead: None,
            name: name.into(),
        }
    }

    pub fn composite(lead: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            lead: Some(lead.into()),
            name: name.into(),
        }
    }
}

/// Bounds of an index range scan.
///
/// `prefix` pins the leading component of a composite index to one value;
/// `lower`/`upper` bound the full key tuple and are combined with the prefix
/// by intersection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRange {
    pub prefix: Option<String>,
    pub lower: Bound<IndexKey>,
    pub upper: Bound<IndexKey>,
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::full()
    }
}

impl KeyRange {
    pub fn full() -> Self {
        Self {
            prefix: None,
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    pub fn prefix(value: impl Into<String>) -> Self {
        Self {
            prefix: Some(value.into()),
            ..Self::full()
        }
    }

    /// Keys strictly greater than `key`.
    pub fn after(mut self, key: IndexKey) -> Self {
        self.lower = Bound::Excluded(key);
        self
    }

    /// Keys strictly less than `key`.
    pub fn before(mut self, key: IndexKey) -> Self {
        self.upper = Bound::Excluded(key);
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.prefix.is_none()
            && matches!(self.lower, Bound::Unbounded)
            && matches!(self.upper, Bound::Unbounded)
    }

    pub fn contains(&self, key: &IndexKey) -> bool {
        if let Some(prefix) = &self.prefix
            && key.lead.as_deref() != Some(prefix.as_str())
        {
            return false;
        }
        let above = match &self.lower {
            Bound::Included(lower) => key >= lower,
            Bound::Excluded(lower) => key > lower,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(upper) => key <= upper,
            Bound::Excluded(upper) => key < upper,
            Bound::Unbounded => true,
        };
        above && below
    }
}

/// Read side of an ordered, indexed record set.
///
/// `visit` walks the keys of `range` in `direction` order and stops as soon as
/// the visitor breaks, so callers only pay for the rows they consume.
pub trait IndexedStore {
    fn visit(
        &self,
        index: IndexKind,
        range: &KeyRange,
        direction: ScanDirection,
        visitor: &mut dyn FnMut(Record) -> ControlFlow<()>,
    ) -> Result<(), StoreError>;

    fn count(&self, index: IndexKind, range: &KeyRange) -> Result<u64, StoreError>;

    fn scan(
        &self,
        index: IndexKind,
        range: &KeyRange,
        direction: ScanDirection,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let mut out = Vec::with_capacity(limit.min(1024));
        if limit == 0 {
            return Ok(out);
        }
        self.visit(index, range, direction, &mut |record| {
            out.push(record);
            if out.len() >= limit {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(out)
    }
}
