//! LRU cache of rendered views that depend on sync results.

use std::num::NonZeroUsize;

use lru::LruCache;
use uuid::Uuid;

use crate::models::sync_job::JobKind;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Identity of a cached view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// The project's sync summary
    Summary(Uuid),
    /// Entity list populated by one integration (action items, resourcing data)
    Entities { project_id: Uuid, kind: JobKind },
}

impl CacheKey {
    /// Views that go stale when a `kind` sync succeeds.
    pub fn dependents_of_success(project_id: Uuid, kind: JobKind) -> [CacheKey; 2] {
        [
            CacheKey::Entities { project_id, kind },
            CacheKey::Summary(project_id),
        ]
    }
}

pub struct ViewCache<V> {
    entries: LruCache<CacheKey, V>,
}

impl<V: Clone> ViewCache<V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<V> {
        self.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains(key)
    }

    pub fn put(&mut self, key: CacheKey, view: V) {
        self.entries.put(key, view);
    }

    /// Drop every listed key; returns how many were present.
    pub fn invalidate<'a, I>(&mut self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a CacheKey>,
    {
        keys.into_iter()
            .filter(|key| self.entries.pop(key).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> Default for ViewCache<V> {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_invalidates_entities_and_summary_only() {
        let project_id = Uuid::new_v4();
        let mut cache: ViewCache<&str> = ViewCache::default();
        cache.put(CacheKey::Summary(project_id), "summary");
        cache.put(
            CacheKey::Entities {
                project_id,
                kind: JobKind::IssueTracker,
            },
            "action items",
        );
        cache.put(
            CacheKey::Entities {
                project_id,
                kind: JobKind::Resourcing,
            },
            "resourcing",
        );

        let dropped = cache.invalidate(&CacheKey::dependents_of_success(
            project_id,
            JobKind::IssueTracker,
        ));

        assert_eq!(dropped, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&CacheKey::Entities {
            project_id,
            kind: JobKind::Resourcing
        }));
    }

    #[test]
    fn least_recently_used_view_is_evicted() {
        let mut cache: ViewCache<u8> = ViewCache::new(NonZeroUsize::new(2).unwrap());
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        cache.put(CacheKey::Summary(a), 1);
        cache.put(CacheKey::Summary(b), 2);
        assert_eq!(cache.get(&CacheKey::Summary(a)), Some(1));
        cache.put(CacheKey::Summary(c), 3);

        assert!(cache.contains(&CacheKey::Summary(a)));
        assert!(!cache.contains(&CacheKey::Summary(b)));
    }
}
