//! The currently-active replica pool.
//!
//! Indices (by node, by AZ, by model id) are computed on demand by
//! scanning the map rather than maintained incrementally: the set this
//! router operates over is small in practice (bounded by inflight
//! concurrency), so an extra layer of incremental index bookkeeping
//! would be complexity without a measurable payoff.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::replica::{ReplicaHandle, ReplicaId};

/// The set of replicas the router currently considers active.
#[derive(Default)]
pub struct ReplicaSet {
    replicas: HashMap<ReplicaId, Arc<dyn ReplicaHandle>>,
}

impl ReplicaSet {
    pub fn new() -> Self {
        Self {
            replicas: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn contains(&self, id: &ReplicaId) -> bool {
        self.replicas.contains_key(id)
    }

    pub fn get(&self, id: &ReplicaId) -> Option<Arc<dyn ReplicaHandle>> {
        self.replicas.get(id).cloned()
    }

    pub fn all_ids(&self) -> Vec<ReplicaId> {
        self.replicas.keys().cloned().collect()
    }

    pub fn active_id_set(&self) -> std::collections::HashSet<ReplicaId> {
        self.replicas.keys().cloned().collect()
    }

    /// Atomically replaces the active set. Returns the ids that are new
    /// (weren't present before), so the facade can warm the cache for
    /// them with an eager probe.
    pub fn replace(&mut self, new_replicas: Vec<Arc<dyn ReplicaHandle>>) -> Vec<ReplicaId> {
        let mut next: HashMap<ReplicaId, Arc<dyn ReplicaHandle>> = HashMap::new();
        let mut added = Vec::new();
        for handle in new_replicas {
            let id = handle.replica_id().clone();
            if !self.replicas.contains_key(&id) {
                added.push(id.clone());
            }
            next.insert(id, handle);
        }
        self.replicas = next;
        added
    }

    /// Removes a single replica, e.g. on observed `PermanentlyDead`.
    pub fn remove(&mut self, id: &ReplicaId) -> Option<Arc<dyn ReplicaHandle>> {
        self.replicas.remove(id)
    }

    pub fn by_node(&self, node_id: &str) -> Vec<ReplicaId> {
        self.replicas
            .values()
            .filter(|h| h.node_id() == node_id)
            .map(|h| h.replica_id().clone())
            .collect()
    }

    pub fn by_az(&self, az: &str) -> Vec<ReplicaId> {
        self.replicas
            .values()
            .filter(|h| h.availability_zone() == Some(az))
            .map(|h| h.replica_id().clone())
            .collect()
    }

    pub fn by_model(&self, model_id: &str) -> Vec<ReplicaId> {
        self.replicas
            .values()
            .filter(|h| h.multiplexed_model_ids().contains(model_id))
            .map(|h| h.replica_id().clone())
            .collect()
    }

    /// Replicas that have at least one multiplexed model loaded.
    pub fn with_any_model(&self) -> Vec<ReplicaId> {
        self.replicas
            .values()
            .filter(|h| !h.multiplexed_model_ids().is_empty())
            .map(|h| h.replica_id().clone())
            .collect()
    }

    pub fn model_count(&self, id: &ReplicaId) -> usize {
        self.replicas
            .get(id)
            .map(|h| h.multiplexed_model_ids().len())
            .unwrap_or(0)
    }
}
