//! Deadline-bounded probing of a replica's queue length.

use std::time::Duration;

use crate::replica::{ProbeError, ReplicaHandle};

/// Classification of a completed probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Reported queue length is below the replica's capacity.
    Available(u32),
    /// Reported queue length is at or above capacity.
    AtCapacity(u32),
    /// The replica is reachable but can't serve right now; stays active.
    TransientUnavailable,
    /// The replica is gone for good; the caller should evict it.
    PermanentlyDead,
    /// The deadline elapsed before the replica responded. The in-flight
    /// call was cancelled (the future was dropped by
    /// [`tokio::time::timeout`]), not left running.
    TimedOut,
}

/// Computes the deadline for the `attempt`-th probe (0-indexed):
/// doubling from `base`, capped at `max`. If `max < base`, every attempt
/// uses `base` (doubling never applies).
pub fn deadline_for_attempt(base: Duration, max: Duration, attempt: u32) -> Duration {
    if max < base {
        return base;
    }
    let mut deadline = base;
    for _ in 0..attempt {
        deadline = std::cmp::min(deadline.saturating_mul(2), max);
    }
    deadline
}

/// Probes `handle` with a hard wall-clock bound of `deadline`. The
/// handle's own future is raced against [`tokio::time::timeout`]; on
/// elapse, the future is dropped (cancelled), not merely abandoned,
/// without needing a bespoke cancellation token.
pub async fn probe_replica(handle: &dyn ReplicaHandle, deadline: Duration) -> ProbeOutcome {
    match tokio::time::timeout(deadline, handle.get_queue_len(deadline)).await {
        Err(_elapsed) => ProbeOutcome::TimedOut,
        Ok(Err(ProbeError::TransientUnavailable)) => ProbeOutcome::TransientUnavailable,
        Ok(Err(ProbeError::PermanentlyDead)) => ProbeOutcome::PermanentlyDead,
        Ok(Err(ProbeError::Timeout)) => ProbeOutcome::TimedOut,
        Ok(Ok(queue_len)) => {
            if queue_len < handle.max_ongoing_requests() {
                ProbeOutcome::Available(queue_len)
            } else {
                ProbeOutcome::AtCapacity(queue_len)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::test_support::{StubBehavior, StubReplica};

    #[test]
    fn deadline_doubles_up_to_cap() {
        let base = Duration::from_millis(1);
        let max = Duration::from_millis(5);
        assert_eq!(deadline_for_attempt(base, max, 0), Duration::from_millis(1));
        assert_eq!(deadline_for_attempt(base, max, 1), Duration::from_millis(2));
        assert_eq!(deadline_for_attempt(base, max, 2), Duration::from_millis(4));
        assert_eq!(deadline_for_attempt(base, max, 3), Duration::from_millis(5));
        assert_eq!(deadline_for_attempt(base, max, 10), Duration::from_millis(5));
    }

    #[test]
    fn deadline_is_constant_when_max_below_base() {
        let base = Duration::from_millis(10);
        let max = Duration::from_millis(5);
        for attempt in 0..5 {
            assert_eq!(deadline_for_attempt(base, max, attempt), base);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_the_call() {
        let replica = StubReplica::new("dep", "1", 10).with_behavior(StubBehavior::AlwaysTimeout);
        let outcome = probe_replica(&replica, Duration::from_millis(1)).await;
        assert_eq!(outcome, ProbeOutcome::TimedOut);
    }

    #[tokio::test]
    async fn available_below_capacity() {
        let replica = StubReplica::new("dep", "1", 10);
        replica.set_queue_len(3);
        let outcome = probe_replica(&replica, Duration::from_secs(1)).await;
        assert_eq!(outcome, ProbeOutcome::Available(3));
    }

    #[tokio::test]
    async fn at_capacity_when_queue_len_meets_max() {
        let replica = StubReplica::new("dep", "1", 10);
        replica.set_queue_len(10);
        let outcome = probe_replica(&replica, Duration::from_secs(1)).await;
        assert_eq!(outcome, ProbeOutcome::AtCapacity(10));
    }

    #[tokio::test]
    async fn permanently_dead_is_classified() {
        let replica =
            StubReplica::new("dep", "1", 10).with_behavior(StubBehavior::PermanentlyDead);
        let outcome = probe_replica(&replica, Duration::from_secs(1)).await;
        assert_eq!(outcome, ProbeOutcome::PermanentlyDead);
    }

    #[tokio::test]
    async fn transient_unavailable_is_classified() {
        let replica =
            StubReplica::new("dep", "1", 10).with_behavior(StubBehavior::TransientUnavailable);
        let outcome = probe_replica(&replica, Duration::from_secs(1)).await;
        assert_eq!(outcome, ProbeOutcome::TransientUnavailable);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Deadline history is non-decreasing, bounded by `max`, and each
        /// successor is either `max` or exactly double its predecessor.
        #[test]
        fn deadline_sequence_doubles_and_caps(
            base_ms in 1u64..50,
            max_ms in 1u64..500,
            attempts in 0u32..20,
        ) {
            let base = Duration::from_millis(base_ms);
            let max = Duration::from_millis(max_ms);

            if max < base {
                for attempt in 0..attempts {
                    prop_assert_eq!(deadline_for_attempt(base, max, attempt), base);
                }
                return Ok(());
            }

            let mut prev = deadline_for_attempt(base, max, 0);
            prop_assert_eq!(prev, base);
            for attempt in 1..attempts {
                let next = deadline_for_attempt(base, max, attempt);
                prop_assert!(next >= prev);
                prop_assert!(next <= max);
                let doubled = next == std::cmp::min(prev.saturating_mul(2), max);
                prop_assert!(doubled);
                prev = next;
            }
        }
    }
}
