//! The router facade: public entry point over the replica set, the
//! pending queue and the worker pool.

use std::collections::HashSet as StdHashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};

use request_router_core::EventListeners;

use crate::cache::QueueLengthCache;
use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::events::RouterEvent;
use crate::pending::{CancelSignal, ChooseResult, PendingQueue, PendingRequest};
use crate::ranker::Tier;
use crate::replica::{ReplicaHandle, ReplicaId};
use crate::replica_set::ReplicaSet;
use crate::worker;

/// Everything a caller needs to hand the router a new request. Built by
/// the caller, not the router: `request_id` and `cancel` are the
/// caller's to keep, so it can cancel the request later.
pub struct RequestSpec {
    pub request_id: String,
    pub multiplexed_model_id: Option<String>,
    pub is_retry: bool,
    pub cancel: Arc<CancelSignal>,
}

impl RequestSpec {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            multiplexed_model_id: None,
            is_retry: false,
            cancel: CancelSignal::new(),
        }
    }

    pub fn with_multiplexed_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.multiplexed_model_id = Some(model_id.into());
        self
    }

    pub fn with_retry(mut self, is_retry: bool) -> Self {
        self.is_retry = is_retry;
        self
    }

    pub fn with_cancel_signal(mut self, cancel: Arc<CancelSignal>) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Level-triggered latch for "the replica set changed", used to wake
/// workers sleeping out a backoff early instead of on the next timer
/// tick. Same race-free `Notify` pattern as [`CancelSignal`]: the flag
/// is checked only after the `notified()` future already exists.
#[derive(Default)]
pub(crate) struct Latch {
    set: AtomicBool,
    notify: Notify,
}

impl Latch {
    pub(crate) fn raise(&self) {
        self.set.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub(crate) async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.set.swap(false, Ordering::AcqRel) {
                return;
            }
            notified.await;
        }
    }
}

/// Mutable state behind the single lock. Every mutation happens
/// synchronously while the lock is held; any `.await` a worker performs
/// happens strictly outside of it.
pub(crate) struct RouterState {
    pub(crate) replicas: ReplicaSet,
    pub(crate) pending: PendingQueue,
    pub(crate) routing_tasks: StdHashSet<u64>,
    pub(crate) queue_len_cache: Option<QueueLengthCache>,
    pub(crate) next_worker_id: u64,
}

/// Shared state handed to every routing worker as an `Arc`.
pub(crate) struct RouterShared {
    pub(crate) config: RouterConfig,
    pub(crate) state: Mutex<RouterState>,
    pub(crate) replicas_updated: Latch,
    pub(crate) events: EventListeners<RouterEvent>,
    next_internal_id: AtomicU64,
}

impl RouterShared {
    pub(crate) fn emit(&self, event: RouterEvent) {
        self.events.emit(&event);
        #[cfg(feature = "tracing")]
        crate::events::log_event(&event);
        #[cfg(feature = "metrics")]
        crate::events::record_metric(&event);
    }

}

/// Spawns workers up to the dynamic pool target `min(|pending|, 2 *
/// |replicas|, max_num_routing_tasks_cap)`, minus however many are
/// already running (no point spawning more than there is work for, or
/// more than twice the replica count can usefully serve concurrently).
fn top_up_workers(shared: &Arc<RouterShared>) {
    let mut state = shared.state.lock();
    let cap = shared.config.max_num_routing_tasks_cap;
    let target = state
        .pending
        .len()
        .min(2 * state.replicas.len())
        .min(cap);
    let wanted = target.saturating_sub(state.routing_tasks.len());
    for _ in 0..wanted {
        let worker_id = state.next_worker_id;
        state.next_worker_id += 1;
        state.routing_tasks.insert(worker_id);
        let shared = shared.clone();
        tokio::spawn(async move {
            worker::run_worker(shared, worker_id).await;
        });
    }
}

/// Locality- and load-aware request router.
///
/// Cloning a [`Router`] is cheap (it's a handle over an `Arc`); every
/// clone shares the same replica set, pending queue and worker pool.
#[derive(Clone)]
pub struct Router {
    shared: Arc<RouterShared>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        let queue_len_cache = config
            .use_replica_queue_len_cache
            .then(|| QueueLengthCache::new(config.queue_len_cache_staleness_timeout_s));

        let state = RouterState {
            replicas: ReplicaSet::new(),
            pending: PendingQueue::new(),
            routing_tasks: StdHashSet::new(),
            queue_len_cache,
            next_worker_id: 0,
        };

        let events = config.event_listeners.clone();

        Self {
            shared: Arc::new(RouterShared {
                config,
                state: Mutex::new(state),
                replicas_updated: Latch::default(),
                events,
                next_internal_id: AtomicU64::new(0),
            }),
        }
    }

    /// Replaces the active replica set. Replicas not present in
    /// `new_replicas` are dropped, along with any cached queue-length
    /// entry for them. Newly-seen replicas get an eager background
    /// probe to warm the cache instead of waiting for the first request
    /// to discover them cold.
    pub fn update_replicas(&self, new_replicas: Vec<Arc<dyn ReplicaHandle>>) {
        let newly_added = {
            let mut state = self.shared.state.lock();
            let added = state.replicas.replace(new_replicas);
            let active = state.replicas.active_id_set();
            if let Some(cache) = state.queue_len_cache.as_mut() {
                cache.remove_inactive(&active);
            }
            added
        };

        self.shared.replicas_updated.raise();

        for id in newly_added {
            let shared = self.shared.clone();
            tokio::spawn(async move {
                worker::warm_cache_for(&shared, &id).await;
            });
        }

        top_up_workers(&self.shared);
    }

    /// Removes a single replica, e.g. because the caller observed it
    /// die through a channel the router doesn't see (health checks,
    /// deployment scale-down).
    pub fn remove_replica(&self, id: &ReplicaId) {
        let mut state = self.shared.state.lock();
        state.replicas.remove(id);
        if let Some(cache) = state.queue_len_cache.as_mut() {
            cache.remove(id);
        }
        drop(state);
        self.shared.replicas_updated.raise();
    }

    /// Enqueues a request and returns a future that resolves once it's
    /// bound to a replica (or cancelled). The returned future can be
    /// dropped without cancelling the request server-side; use
    /// `spec.cancel` for that.
    pub async fn choose_replica_for_request(
        &self,
        spec: RequestSpec,
    ) -> Result<Arc<dyn ReplicaHandle>, RouterError> {
        let (tx, rx) = oneshot::channel::<ChooseResult>();
        let internal_id = self.shared.next_internal_id.fetch_add(1, Ordering::Relaxed);
        let created_at = self.shared.config.clock.now_s();

        let request = PendingRequest {
            request_id: spec.request_id,
            internal_id,
            multiplexed_model_id: spec.multiplexed_model_id,
            created_at,
            is_retry: spec.is_retry,
            cancel: spec.cancel,
            result_tx: tx,
        };

        {
            let mut state = self.shared.state.lock();
            state.pending.push(request);
        }

        top_up_workers(&self.shared);

        match rx.await {
            Ok(result) => result,
            Err(_dropped) => Err(RouterError::Cancelled),
        }
    }

    /// Number of routing workers currently running.
    pub fn curr_num_routing_tasks(&self) -> usize {
        self.shared.state.lock().routing_tasks.len()
    }

    /// Number of requests waiting for a worker to pick them up.
    pub fn num_pending_requests(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// `2 * num_active_replicas`, capped at `max_num_routing_tasks_cap`.
    pub fn max_num_routing_tasks(&self) -> usize {
        let state = self.shared.state.lock();
        (2 * state.replicas.len()).min(self.shared.config.max_num_routing_tasks_cap)
    }

    pub fn num_active_replicas(&self) -> usize {
        self.shared.state.lock().replicas.len()
    }

    /// Subset of `candidates` (or every active replica, if `None`) whose
    /// queue-length cache entry is below its `max_ongoing_requests`.
    /// Replicas without a cache entry are considered available — the
    /// cache can only confirm unavailability is stale, never rule a
    /// replica out.
    pub fn select_available_replicas(&self, candidates: Option<&[ReplicaId]>) -> Vec<ReplicaId> {
        let state = self.shared.state.lock();
        let now = self.shared.config.clock.now_s();
        let ids: Vec<ReplicaId> = match candidates {
            Some(c) => c.to_vec(),
            None => state.replicas.all_ids(),
        };
        ids.into_iter()
            .filter(|id| match state.replicas.get(id) {
                Some(handle) => match state.queue_len_cache.as_ref().and_then(|c| c.get(id, now)) {
                    Some(q) => q < handle.max_ongoing_requests(),
                    None => true,
                },
                None => false,
            })
            .collect()
    }

    /// Locality tiers (L1/L2/L3) over the current active set, for
    /// introspection and tests.
    pub fn rank_replicas_via_locality(&self) -> Vec<Tier> {
        let state = self.shared.state.lock();
        crate::ranker::rank_replicas_via_locality(&state.replicas, &self.shared.config)
    }

    /// Multiplex tiers (M1/M2) over the current active set for
    /// `model_id`, for introspection and tests.
    pub fn rank_replicas_via_multiplex(&self, model_id: &str) -> Vec<Tier> {
        let state = self.shared.state.lock();
        crate::ranker::rank_replicas_via_multiplex(&state.replicas, model_id)
    }
}
