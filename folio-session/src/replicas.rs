//! Bounded cache of replicas, ordered by activation recency.

use std::sync::Arc;

use folio_core::{DocumentId, Replica};
use lru::LruCache;

pub struct ReplicaStore {
    cache: LruCache<DocumentId, Arc<Replica>>,
    capacity: usize,
}

impl ReplicaStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::unbounded(),
            capacity: capacity.max(1),
        }
    }

    /// Create a fresh replica for `id`, destroying any previous one.
    ///
    /// Replicas are never reused across activations.
    pub fn acquire(&mut self, id: &DocumentId) -> Arc<Replica> {
        if let Some(previous) = self.cache.pop(id) {
            Self::destroy(&previous);
        }
        let replica = Arc::new(Replica::new(id.clone()));
        self.cache.put(id.clone(), replica.clone());
        log::debug!("Acquired replica {} for {id}", replica.instance());
        replica
    }

    /// Evict least-recently-activated entries other than `active` until the
    /// cache fits its capacity. Returns the evicted ids.
    pub fn evict_excess(&mut self, active: &DocumentId) -> Vec<DocumentId> {
        let excess = self.cache.len().saturating_sub(self.capacity);
        let victims: Vec<DocumentId> = self
            .cache
            .iter()
            .rev()
            .map(|(id, _)| id)
            .filter(|id| *id != active)
            .take(excess)
            .cloned()
            .collect();

        for id in &victims {
            if let Some(replica) = self.cache.pop(id) {
                log::debug!("Evicting replica for {id}");
                Self::destroy(&replica);
            }
        }
        victims
    }

    /// Remove and destroy the replica for `id`, if cached.
    pub fn discard(&mut self, id: &DocumentId) {
        if let Some(replica) = self.cache.pop(id) {
            Self::destroy(&replica);
        }
    }

    pub fn destroy_all(&mut self) {
        while let Some((_, replica)) = self.cache.pop_lru() {
            Self::destroy(&replica);
        }
    }

    pub fn get(&self, id: &DocumentId) -> Option<&Arc<Replica>> {
        self.cache.peek(id)
    }

    /// Cached ids, most recently activated first.
    pub fn cached_ids(&self) -> Vec<DocumentId> {
        self.cache.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Destruction is best-effort: the entry is gone from the cache either way.
    fn destroy(replica: &Replica) {
        if let Err(e) = replica.destroy() {
            log::warn!("Failed to destroy replica for {}: {e}", replica.id());
        }
    }
}
