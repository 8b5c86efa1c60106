//! Bounded-staleness cache of per-replica reported queue length.
//!
//! No concurrency of its own: callers (the router's single state lock)
//! serialize access. Keeping re-probed replicas out of the ranker's hot
//! path bounds probe traffic without introducing another lock.

use hashbrown::HashMap;

use crate::replica::ReplicaId;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    queue_len: u32,
    timestamp: f64,
}

/// `ReplicaId -> (queue_len, timestamp)` with a staleness timeout.
#[derive(Debug)]
pub struct QueueLengthCache {
    entries: HashMap<ReplicaId, CacheEntry>,
    staleness_timeout_s: f64,
}

impl QueueLengthCache {
    pub fn new(staleness_timeout_s: f64) -> Self {
        Self {
            entries: HashMap::new(),
            staleness_timeout_s,
        }
    }

    /// Returns the cached queue length if it was written within
    /// `staleness_timeout_s` of `now`. Entries older than that are
    /// treated as absent, never returned.
    pub fn get(&self, id: &ReplicaId, now: f64) -> Option<u32> {
        self.entries.get(id).and_then(|entry| {
            if now - entry.timestamp <= self.staleness_timeout_s {
                Some(entry.queue_len)
            } else {
                None
            }
        })
    }

    /// Overwrites (or inserts) the cached value for `id`.
    pub fn update(&mut self, id: ReplicaId, queue_len: u32, now: f64) {
        self.entries.insert(
            id,
            CacheEntry {
                queue_len,
                timestamp: now,
            },
        );
    }

    pub fn remove(&mut self, id: &ReplicaId) {
        self.entries.remove(id);
    }

    /// Drops every key not present in `active_ids`.
    pub fn remove_inactive(&mut self, active_ids: &std::collections::HashSet<ReplicaId>) {
        self.entries.retain(|id, _| active_ids.contains(id));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
