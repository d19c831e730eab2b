#![forbid(unsafe_code)]

use crate::{IndexKind, IndexedStore, KeyRange, StoreError};
use dv_core::Filter;

#[derive(Clone, Debug, PartialEq, Eq)]
struct CachedCounts {
    filter: Option<Filter>,
    total: u64,
    filtered: u64,
}

/// Total and filtered record counts, recomputed only when the filter changes
/// or the dataset generation moves on.
#[derive(Clone, Debug, Default)]
pub struct CountCache {
    generation: u64,
    cached: Option<CachedCounts>,
    recomputations: u64,
}

impl CountCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(total, filtered)` for `filter`. With no filter both are equal.
    pub fn resolve<S: IndexedStore + ?Sized>(
        &mut self,
        store: &S,
        filter: Option<&Filter>,
    ) -> Result<(u64, u64), StoreError> {
        if let Some(cached) = &self.cached
            && cached.filter.as_ref() == filter
        {
            tracing::debug!(generation = self.generation, "count cache hit");
            return Ok((cached.total, cached.filtered));
        }

        let total = store.count(IndexKind::Primary, &KeyRange::full())?;
        let filtered = match filter {
            Some(filter) => store.count(
                IndexKind::for_filter(filter.field),
                &KeyRange::prefix(filter.value.clone()),
            )?,
            None => total,
        };
        self.recomputations += 1;
        tracing::debug!(
            generation = self.generation,
            total,
            filtered,
            "count cache recomputed"
        );
        self.cached = Some(CachedCounts {
            filter: filter.cloned(),
            total,
            filtered,
        });
        Ok((total, filtered))
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Drops cached counts that belong to an older dataset generation.
    pub fn sync_generation(&mut self, generation: u64) {
        if self.generation != generation {
            self.generation = generation;
            self.invalidate();
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of times counts were taken from the store.
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProjectionIndex;
    use dv_core::{FilterField, Record};

    fn store() -> ProjectionIndex {
        let mut index = ProjectionIndex::new();
        index.apply_batch(&[
            Record::new("a", "user", "changed"),
            Record::new("b", "user", "deleted"),
            Record::new("c", "group", "changed"),
        ]);
        index
    }

    #[test]
    fn same_filter_reuses_counts() {
        let store = store();
        let mut cache = CountCache::new();
        let filter = Filter::new(FilterField::ChangeType, "changed");
        assert_eq!(cache.resolve(&store, Some(&filter)).expect("counts"), (3, 2));
        assert_eq!(cache.resolve(&store, Some(&filter)).expect("counts"), (3, 2));
        assert_eq!(cache.recomputations(), 1);
    }

    #[test]
    fn clearing_the_filter_recounts() {
        let store = store();
        let mut cache = CountCache::new();
        let filter = Filter::new(FilterField::ObjectType, "group");
        assert_eq!(cache.resolve(&store, Some(&filter)).expect("counts"), (3, 1));
        assert_eq!(cache.resolve(&store, None).expect("counts"), (3, 3));
        assert_eq!(cache.recomputations(), 2);
    }

    #[test]
    fn new_generation_invalidates() {
        let store = store();
        let mut cache = CountCache::new();
        cache.resolve(&store, None).expect("counts");
        cache.sync_generation(0);
        cache.resolve(&store, None).expect("counts");
        assert_eq!(cache.recomputations(), 1);
        cache.sync_generation(1);
        cache.resolve(&store, None).expect("counts");
        assert_eq!(cache.recomputations(), 2);
    }
}
