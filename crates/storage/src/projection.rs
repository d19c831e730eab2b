#![forbid(unsafe_code)]

use crate::{IndexKey, IndexKind, IndexedStore, KeyRange, StoreError};
use dv_core::{Record, ScanDirection};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Bound, ControlFlow};
use std::sync::{Arc, PoisonError, RwLock};

/// Indexed columns of one record; attribute payloads stay in SQLite.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectionEntry {
    pub object_type: String,
    pub change_type: String,
    pub depth: u32,
}

/// In-memory mirror of the record indexes, fed with every batch that was
/// durably written. Serves the same ordered scans as the SQLite store.
#[derive(Debug, Default)]
pub struct ProjectionIndex {
    entries: BTreeMap<String, ProjectionEntry>,
    by_object_type: BTreeSet<(String, String)>,
    by_change_type: BTreeSet<(String, String)>,
}

impl ProjectionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_object_type.clear();
        self.by_change_type.clear();
    }

    pub fn get(&self, name: &str) -> Option<&ProjectionEntry> {
        self.entries.get(name)
    }

    /// Inserts or replaces every record of `records`, keeping the secondary
    /// sets consistent with the primary map.
    pub fn apply_batch(&mut self, records: &[Record]) {
        for record in records {
            let entry = ProjectionEntry {
                object_type: record.object_type.clone(),
                change_type: record.change_type.clone(),
                depth: record.depth,
            };
            if let Some(old) = self.entries.insert(record.name.clone(), entry) {
                self.by_object_type
                    .remove(&(old.object_type, record.name.clone()));
                self.by_change_type
                    .remove(&(old.change_type, record.name.clone()));
            }
            self.by_object_type
                .insert((record.object_type.clone(), record.name.clone()));
            self.by_change_type
                .insert((record.change_type.clone(), record.name.clone()));
        }
    }

    fn record_for(&self, name: &str) -> Option<Record> {
        let entry = self.entries.get(name)?;
        Some(Record {
            name: name.to_string(),
            object_type: entry.object_type.clone(),
            change_type: entry.change_type.clone(),
            depth: entry.depth,
            attributes: None,
            changed_attributes: BTreeSet::new(),
        })
    }

    fn composite_set(&self, index: IndexKind) -> Option<&BTreeSet<(String, String)>> {
        match index {
            IndexKind::Primary => None,
            IndexKind::ObjectType => Some(&self.by_object_type),
            IndexKind::ChangeType => Some(&self.by_change_type),
        }
    }

    /// Names inside `range`, in `direction` order, handed to `visit` until it breaks.
    fn walk_names(
        &self,
        index: IndexKind,
        range: &KeyRange,
        direction: ScanDirection,
        visit: &mut dyn FnMut(&str) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        match self.composite_set(index) {
            None => {
                if range.prefix.is_some() {
                    return Err(StoreError::InvalidInput(
                        "prefix requires a composite index",
                    ));
                }
                let lower = map_bound(&range.lower, |key| Ok(key.name.clone()))?;
                let upper = map_bound(&range.upper, |key| Ok(key.name.clone()))?;
                let Some(bounds) = non_empty(lower, upper) else {
                    return Ok(());
                };
                let iter = self.entries.range::<String, _>(bounds).map(|(name, _)| name);
                drive(iter, direction, visit);
            }
            Some(set) => {
                let mut lower = map_bound(&range.lower, composite_tuple)?;
                let mut upper = map_bound(&range.upper, composite_tuple)?;
                if let Some(prefix) = &range.prefix {
                    lower = tighter_lower(lower, Bound::Included((prefix.clone(), String::new())));
                    upper = tighter_upper(
                        upper,
                        Bound::Excluded((format!("{prefix}\0"), String::new())),
                    );
                }
                let Some(bounds) = non_empty(lower, upper) else {
                    return Ok(());
                };
                let iter = set.range::<(String, String), _>(bounds).map(|(_, name)| name);
                drive(iter, direction, visit);
            }
        }
        Ok(())
    }
}

fn drive<'a, I>(iter: I, direction: ScanDirection, visit: &mut dyn FnMut(&str) -> ControlFlow<()>)
where
    I: DoubleEndedIterator<Item = &'a String>,
{
    match direction {
        ScanDirection::Forward => {
            for name in iter {
                if visit(name.as_str()).is_break() {
                    return;
                }
            }
        }
        ScanDirection::Backward => {
            for name in iter.rev() {
                if visit(name.as_str()).is_break() {
                    return;
                }
            }
        }
    }
}

fn composite_tuple(key: &IndexKey) -> Result<(String, String), StoreError> {
    match &key.lead {
        Some(lead) => Ok((lead.clone(), key.name.clone())),
        None => Err(StoreError::InvalidInput(
            "composite index bound requires a leading value",
        )),
    }
}

fn map_bound<T>(
    bound: &Bound<IndexKey>,
    f: impl Fn(&IndexKey) -> Result<T, StoreError>,
) -> Result<Bound<T>, StoreError> {
    Ok(match bound {
        Bound::Included(key) => Bound::Included(f(key)?),
        Bound::Excluded(key) => Bound::Excluded(f(key)?),
        Bound::Unbounded => Bound::Unbounded,
    })
}

fn bound_key<T>(bound: &Bound<T>) -> Option<&T> {
    match bound {
        Bound::Included(key) | Bound::Excluded(key) => Some(key),
        Bound::Unbounded => None,
    }
}

fn tighter_lower<T: Ord>(a: Bound<T>, b: Bound<T>) -> Bound<T> {
    let (Some(ka), Some(kb)) = (bound_key(&a), bound_key(&b)) else {
        return if matches!(a, Bound::Unbounded) { b } else { a };
    };
    match ka.cmp(kb) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal if matches!(a, Bound::Excluded(_)) => a,
        Ordering::Equal => b,
    }
}

fn tighter_upper<T: Ord>(a: Bound<T>, b: Bound<T>) -> Bound<T> {
    let (Some(ka), Some(kb)) = (bound_key(&a), bound_key(&b)) else {
        return if matches!(a, Bound::Unbounded) { b } else { a };
    };
    match ka.cmp(kb) {
        Ordering::Less => a,
        Ordering::Greater => b,
        Ordering::Equal if matches!(a, Bound::Excluded(_)) => a,
        Ordering::Equal => b,
    }
}

/// `BTreeMap::range` panics on inverted or empty-exclusive bounds; filter those out.
fn non_empty<T: Ord>(lower: Bound<T>, upper: Bound<T>) -> Option<(Bound<T>, Bound<T>)> {
    if let (Some(lo), Some(hi)) = (bound_key(&lower), bound_key(&upper)) {
        match lo.cmp(hi) {
            Ordering::Greater => return None,
            Ordering::Equal
                if matches!(lower, Bound::Excluded(_)) || matches!(upper, Bound::Excluded(_)) =>
            {
                return None;
            }
            _ => {}
        }
    }
    Some((lower, upper))
}

impl IndexedStore for ProjectionIndex {
    fn visit(
        &self,
        index: IndexKind,
        range: &KeyRange,
        direction: ScanDirection,
        visitor: &mut dyn FnMut(Record) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        self.walk_names(index, range, direction, &mut |name| match self.record_for(name) {
            Some(record) => visitor(record),
            None => ControlFlow::Continue(()),
        })
    }

    fn count(&self, index: IndexKind, range: &KeyRange) -> Result<u64, StoreError> {
        if range.is_unbounded() {
            return Ok(self.entries.len() as u64);
        }
        let mut count = 0u64;
        self.walk_names(index, range, ScanDirection::Forward, &mut |_| {
            count += 1;
            ControlFlow::Continue(())
        })?;
        Ok(count)
    }
}

/// Shared handle to the projection; writers publish batches, readers scan.
#[derive(Clone, Debug, Default)]
pub struct ProjectionHandle {
    inner: Arc<RwLock<ProjectionIndex>>,
}

impl ProjectionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, records: &[Record]) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply_batch(records);
    }

    pub fn reset(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn read<T>(&self, f: impl FnOnce(&ProjectionIndex) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&*guard)
    }

    pub fn len(&self) -> usize {
        self.read(ProjectionIndex::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IndexedStore for ProjectionHandle {
    fn visit(
        &self,
        index: IndexKind,
        range: &KeyRange,
        direction: ScanDirection,
        visitor: &mut dyn FnMut(Record) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        self.read(|projection| projection.visit(index, range, direction, visitor))
    }

    fn count(&self, index: IndexKind, range: &KeyRange) -> Result<u64, StoreError> {
        self.read(|projection| projection.count(index, range))
    }
}
