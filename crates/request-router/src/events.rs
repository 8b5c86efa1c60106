//! Router observability events, wired through the shared
//! `request_router_core::events::EventListeners` bus the same way every
//! resilience-pattern crate in this lineage wires its own event enum.

use std::time::Instant;

use request_router_core::ResilienceEvent;

use crate::probe::ProbeOutcome;
use crate::replica::ReplicaId;

/// Events emitted over the lifetime of a routing attempt.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// A probe was attempted against a replica.
    ProbeAttempted {
        replica_id: ReplicaId,
        deadline_s: f64,
        outcome: ProbeOutcomeKind,
        timestamp: Instant,
    },
    /// A replica was evicted from the active set after reporting
    /// permanent death.
    ReplicaEvicted {
        replica_id: ReplicaId,
        timestamp: Instant,
    },
    /// A tier was exhausted (both sampled candidates unavailable) and
    /// routing fell through to the next tier without sleeping.
    TierExhausted {
        request_id: String,
        tier_index: usize,
        timestamp: Instant,
    },
    /// A request was bound to a replica.
    Bound {
        request_id: String,
        replica_id: ReplicaId,
        attempt: u32,
        timestamp: Instant,
    },
    /// A request was cancelled by its caller before binding.
    Cancelled {
        request_id: String,
        timestamp: Instant,
    },
}

/// A `Copy`-friendly summary of [`ProbeOutcome`] for event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcomeKind {
    Available,
    AtCapacity,
    TransientUnavailable,
    PermanentlyDead,
    TimedOut,
}

impl From<&ProbeOutcome> for ProbeOutcomeKind {
    fn from(outcome: &ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Available(_) => ProbeOutcomeKind::Available,
            ProbeOutcome::AtCapacity(_) => ProbeOutcomeKind::AtCapacity,
            ProbeOutcome::TransientUnavailable => ProbeOutcomeKind::TransientUnavailable,
            ProbeOutcome::PermanentlyDead => ProbeOutcomeKind::PermanentlyDead,
            ProbeOutcome::TimedOut => ProbeOutcomeKind::TimedOut,
        }
    }
}

impl RouterEvent {
    fn timestamp_inner(&self) -> Instant {
        match self {
            RouterEvent::ProbeAttempted { timestamp, .. } => *timestamp,
            RouterEvent::ReplicaEvicted { timestamp, .. } => *timestamp,
            RouterEvent::TierExhausted { timestamp, .. } => *timestamp,
            RouterEvent::Bound { timestamp, .. } => *timestamp,
            RouterEvent::Cancelled { timestamp, .. } => *timestamp,
        }
    }
}

impl ResilienceEvent for RouterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RouterEvent::ProbeAttempted { .. } => "probe_attempted",
            RouterEvent::ReplicaEvicted { .. } => "replica_evicted",
            RouterEvent::TierExhausted { .. } => "tier_exhausted",
            RouterEvent::Bound { .. } => "bound",
            RouterEvent::Cancelled { .. } => "cancelled",
        }
    }

    fn timestamp(&self) -> Instant {
        self.timestamp_inner()
    }

    fn pattern_name(&self) -> &str {
        "request-router"
    }
}

#[cfg(feature = "tracing")]
pub(crate) fn log_event(event: &RouterEvent) {
    match event {
        RouterEvent::ProbeAttempted {
            replica_id,
            deadline_s,
            outcome,
            ..
        } => {
            tracing::debug!(%replica_id, deadline_s, ?outcome, "probed replica");
        }
        RouterEvent::ReplicaEvicted { replica_id, .. } => {
            tracing::warn!(%replica_id, "evicted permanently dead replica");
        }
        RouterEvent::TierExhausted {
            request_id,
            tier_index,
            ..
        } => {
            tracing::trace!(request_id, tier_index, "tier exhausted, advancing without sleep");
        }
        RouterEvent::Bound {
            request_id,
            replica_id,
            attempt,
            ..
        } => {
            tracing::debug!(request_id, %replica_id, attempt, "bound request to replica");
        }
        RouterEvent::Cancelled { request_id, .. } => {
            tracing::debug!(request_id, "request cancelled before bind");
        }
    }
}

#[cfg(feature = "metrics")]
pub(crate) fn record_metric(event: &RouterEvent) {
    match event {
        RouterEvent::ProbeAttempted { outcome, .. } => {
            let kind = match outcome {
                ProbeOutcomeKind::Available => "available",
                ProbeOutcomeKind::AtCapacity => "at_capacity",
                ProbeOutcomeKind::TransientUnavailable => "transient_unavailable",
                ProbeOutcomeKind::PermanentlyDead => "permanently_dead",
                ProbeOutcomeKind::TimedOut => "timed_out",
            };
            metrics::counter!("request_router_probes_total", "outcome" => kind).increment(1);
        }
        RouterEvent::ReplicaEvicted { .. } => {
            metrics::counter!("request_router_replica_evictions_total").increment(1);
        }
        RouterEvent::TierExhausted { .. } => {
            metrics::counter!("request_router_tier_exhaustions_total").increment(1);
        }
        RouterEvent::Bound { .. } => {
            metrics::counter!("request_router_binds_total").increment(1);
        }
        RouterEvent::Cancelled { .. } => {
            metrics::counter!("request_router_cancellations_total").increment(1);
        }
    }
}
