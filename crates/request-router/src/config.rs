//! Router configuration and its builder.

use std::sync::Arc;

use request_router_core::{EventListener, EventListeners};

use crate::clock::{Clock, SystemClock};
use crate::events::RouterEvent;
use crate::ranker::{RandRng, RngSource};

/// Immutable configuration a [`crate::Router`] is constructed from.
///
/// Built via [`RouterConfig::builder`], following the same
/// chained-setter shape used across every resilience-pattern config in
/// this codebase's lineage (e.g. a circuit breaker's
/// `CircuitBreakerConfig::builder()...build()`).
pub struct RouterConfig {
    pub(crate) prefer_local_node_routing: bool,
    pub(crate) prefer_local_az_routing: bool,
    pub(crate) self_node_id: String,
    pub(crate) self_availability_zone: Option<String>,
    pub(crate) use_replica_queue_len_cache: bool,
    pub(crate) queue_len_response_deadline_s: f64,
    pub(crate) max_queue_len_response_deadline_s: f64,
    pub(crate) queue_len_cache_staleness_timeout_s: f64,
    pub(crate) multiplex_matching_timeout_s: f64,
    pub(crate) backoff_sequence_s: Vec<f64>,
    pub(crate) max_num_routing_tasks_cap: usize,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) rng: Arc<dyn RngSource>,
    pub(crate) event_listeners: EventListeners<RouterEvent>,
}

impl RouterConfig {
    pub fn builder() -> RouterConfigBuilder {
        RouterConfigBuilder::new()
    }

    /// Sleep duration for attempt index `i`: the last entry of the
    /// sequence applies to every attempt beyond its length.
    pub fn backoff_for_attempt(&self, attempt: usize) -> std::time::Duration {
        let seconds = self
            .backoff_sequence_s
            .get(attempt)
            .or_else(|| self.backoff_sequence_s.last())
            .copied()
            .unwrap_or(0.0);
        std::time::Duration::from_secs_f64(seconds.max(0.0))
    }
}

/// Builder for [`RouterConfig`].
pub struct RouterConfigBuilder {
    prefer_local_node_routing: bool,
    prefer_local_az_routing: bool,
    self_node_id: String,
    self_availability_zone: Option<String>,
    use_replica_queue_len_cache: bool,
    queue_len_response_deadline_s: f64,
    max_queue_len_response_deadline_s: f64,
    queue_len_cache_staleness_timeout_s: f64,
    multiplex_matching_timeout_s: f64,
    backoff_sequence_s: Vec<f64>,
    max_num_routing_tasks_cap: usize,
    clock: Arc<dyn Clock>,
    rng: Arc<dyn RngSource>,
    event_listeners: EventListeners<RouterEvent>,
}

impl RouterConfigBuilder {
    pub fn new() -> Self {
        Self {
            prefer_local_node_routing: true,
            prefer_local_az_routing: true,
            self_node_id: String::new(),
            self_availability_zone: None,
            use_replica_queue_len_cache: true,
            queue_len_response_deadline_s: 0.1,
            max_queue_len_response_deadline_s: 1.0,
            queue_len_cache_staleness_timeout_s: 10.0,
            multiplex_matching_timeout_s: 1.0,
            backoff_sequence_s: vec![0.0, 0.05, 0.1, 0.15, 0.2],
            max_num_routing_tasks_cap: 16,
            clock: Arc::new(SystemClock::new()),
            rng: Arc::new(RandRng::default()),
            event_listeners: EventListeners::new(),
        }
    }

    /// Enable tier L1 (same-node preference). Default: `true`.
    pub fn prefer_local_node_routing(mut self, enable: bool) -> Self {
        self.prefer_local_node_routing = enable;
        self
    }

    /// Enable tier L2 (same-AZ preference). Default: `true`.
    pub fn prefer_local_az_routing(mut self, enable: bool) -> Self {
        self.prefer_local_az_routing = enable;
        self
    }

    pub fn self_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.self_node_id = node_id.into();
        self
    }

    pub fn self_availability_zone(mut self, az: impl Into<String>) -> Self {
        self.self_availability_zone = Some(az.into());
        self
    }

    /// Enable the bounded-staleness queue-length cache. Default: `true`.
    pub fn use_replica_queue_len_cache(mut self, enable: bool) -> Self {
        self.use_replica_queue_len_cache = enable;
        self
    }

    /// Initial probe deadline. Default: 100ms.
    pub fn queue_len_response_deadline_s(mut self, seconds: f64) -> Self {
        self.queue_len_response_deadline_s = seconds;
        self
    }

    /// Cap for deadline doubling. If set below
    /// `queue_len_response_deadline_s`, every probe uses the initial
    /// deadline (no doubling). Default: 1s.
    pub fn max_queue_len_response_deadline_s(mut self, seconds: f64) -> Self {
        self.max_queue_len_response_deadline_s = seconds;
        self
    }

    /// Default: 10s.
    pub fn queue_len_cache_staleness_timeout_s(mut self, seconds: f64) -> Self {
        self.queue_len_cache_staleness_timeout_s = seconds;
        self
    }

    /// Default: 1s.
    pub fn multiplex_matching_timeout_s(mut self, seconds: f64) -> Self {
        self.multiplex_matching_timeout_s = seconds;
        self
    }

    /// Delays per attempt index; the last entry applies to every
    /// attempt beyond the sequence's length. Default:
    /// `[0, 0.05, 0.1, 0.15, 0.2]`.
    pub fn backoff_sequence_s(mut self, sequence: Vec<f64>) -> Self {
        self.backoff_sequence_s = sequence;
        self
    }

    /// Hard cap on concurrent routing workers. `0` means no routing
    /// worker is ever spawned; submitted requests wait until the cap is
    /// raised. Default: 16.
    pub fn max_num_routing_tasks_cap(mut self, cap: usize) -> Self {
        self.max_num_routing_tasks_cap = cap;
        self
    }

    /// Inject a clock, e.g. [`crate::clock::FakeClock`] in tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Inject an RNG source for deterministic candidate sampling in tests.
    pub fn rng(mut self, rng: Arc<dyn RngSource>) -> Self {
        self.rng = rng;
        self
    }

    /// Registers an observer for every [`RouterEvent`] the router emits.
    pub fn on_event<L>(mut self, listener: L) -> Self
    where
        L: EventListener<RouterEvent> + 'static,
    {
        self.event_listeners.add(listener);
        self
    }

    pub fn build(self) -> RouterConfig {
        RouterConfig {
            prefer_local_node_routing: self.prefer_local_node_routing,
            prefer_local_az_routing: self.prefer_local_az_routing,
            self_node_id: self.self_node_id,
            self_availability_zone: self.self_availability_zone,
            use_replica_queue_len_cache: self.use_replica_queue_len_cache,
            queue_len_response_deadline_s: self.queue_len_response_deadline_s,
            max_queue_len_response_deadline_s: self.max_queue_len_response_deadline_s,
            queue_len_cache_staleness_timeout_s: self.queue_len_cache_staleness_timeout_s,
            multiplex_matching_timeout_s: self.multiplex_matching_timeout_s,
            backoff_sequence_s: self.backoff_sequence_s,
            max_num_routing_tasks_cap: self.max_num_routing_tasks_cap,
            clock: self.clock,
            rng: self.rng,
            event_listeners: self.event_listeners,
        }
    }
}

impl Default for RouterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
