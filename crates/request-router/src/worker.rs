//! Routing workers: the loop that actually binds a [`PendingRequest`] to
//! a replica.
//!
//! Workers are spawned and retired on demand by
//! [`crate::router::RouterShared::top_up_workers`]; a worker that finds
//! the pending queue empty simply exits instead of parking forever, so
//! the pool shrinks back to zero between bursts.

use std::sync::Arc;
use std::time::Duration;

use crate::events::RouterEvent;
use crate::pending::PendingRequest;
use crate::probe::{ProbeOutcome, deadline_for_attempt, probe_replica};
use crate::ranker::{self, Tier};
use crate::replica::{ReplicaHandle, ReplicaId};
use crate::router::RouterShared;

/// Outcome of trying a single tier for a single request.
enum TierResult {
    Bound(Arc<dyn ReplicaHandle>),
    Cancelled,
    Exhausted,
}

pub(crate) async fn run_worker(shared: Arc<RouterShared>, worker_id: u64) {
    loop {
        let request = {
            let mut state = shared.state.lock();
            state.pending.pop_oldest_ready()
        };

        let Some(request) = request else {
            let mut state = shared.state.lock();
            state.routing_tasks.remove(&worker_id);
            return;
        };

        route_request(&shared, request, worker_id).await;
    }
}

async fn route_request(shared: &Arc<RouterShared>, req: PendingRequest, worker_id: u64) {
    let mut attempt: u32 = 0;

    loop {
        if req.cancel.is_cancelled() {
            shared.emit(RouterEvent::Cancelled {
                request_id: req.request_id.clone(),
                timestamp: std::time::Instant::now(),
            });
            let _ = req.result_tx.send(Err(crate::error::RouterError::Cancelled));
            return;
        }

        let is_empty = shared.state.lock().replicas.is_empty();
        if is_empty {
            // With no active replica, this worker cannot do anything
            // useful until one reappears. Deregister from `routing_tasks`
            // while parked so the pool is reported empty, matching the
            // invariant that no routing task is counted while there are
            // no replicas to route to; re-register on the way out.
            shared.state.lock().routing_tasks.remove(&worker_id);
            tokio::select! {
                _ = shared.replicas_updated.wait() => {}
                _ = req.cancel.cancelled() => {
                    let _ = req.result_tx.send(Err(crate::error::RouterError::Cancelled));
                    return;
                }
            }
            shared.state.lock().routing_tasks.insert(worker_id);
            continue;
        }

        let tiers = {
            let state = shared.state.lock();
            ranker::rank_for_request(
                &state.replicas,
                &shared.config,
                req.multiplexed_model_id.as_deref(),
                req.created_at,
                shared.config.clock.now_s(),
            )
        };

        let mut bound: Option<Arc<dyn ReplicaHandle>> = None;
        let mut cancelled = false;

        for (tier_index, tier) in tiers.iter().enumerate() {
            if tier.is_empty() {
                continue;
            }
            match try_tier(shared, &req, tier, attempt).await {
                TierResult::Bound(handle) => {
                    bound = Some(handle);
                    break;
                }
                TierResult::Cancelled => {
                    cancelled = true;
                    break;
                }
                TierResult::Exhausted => {
                    shared.emit(RouterEvent::TierExhausted {
                        request_id: req.request_id.clone(),
                        tier_index,
                        timestamp: std::time::Instant::now(),
                    });
                }
            }
        }

        if cancelled || req.cancel.is_cancelled() {
            let _ = req.result_tx.send(Err(crate::error::RouterError::Cancelled));
            return;
        }

        if let Some(handle) = bound {
            let _ = req.result_tx.send(Ok(handle));
            return;
        }

        let delay = shared.config.backoff_for_attempt(attempt as usize);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shared.replicas_updated.wait() => {}
            _ = req.cancel.cancelled() => {
                let _ = req.result_tx.send(Err(crate::error::RouterError::Cancelled));
                return;
            }
        }
        attempt = attempt.saturating_add(1);
    }
}

/// Tries a single tier: samples up to two candidates, resolves their
/// queue length (from cache when fresh, by probing otherwise), and
/// binds to whichever has the shorter queue.
async fn try_tier(
    shared: &Arc<RouterShared>,
    req: &PendingRequest,
    tier: &Tier,
    attempt: u32,
) -> TierResult {
    let candidates = ranker::sample_from_tier(tier, shared.config.rng.as_ref());
    if candidates.is_empty() {
        return TierResult::Exhausted;
    }

    let now = shared.config.clock.now_s();
    let mut fresh_available: Vec<(ReplicaId, u32)> = Vec::new();
    let mut needs_probe: Vec<ReplicaId> = Vec::new();

    {
        let state = shared.state.lock();
        for id in &candidates {
            // The cache may only accept a candidate, never reject one:
            // a fresh reading at or above capacity still needs a probe,
            // since capacity may have changed since the reading was
            // taken.
            let cached = state
                .queue_len_cache
                .as_ref()
                .and_then(|cache| cache.get(id, now));
            let max = state.replicas.get(id).map(|h| h.max_ongoing_requests());
            match (cached, max) {
                (Some(q), Some(max)) if q < max => fresh_available.push((id.clone(), q)),
                (_, Some(_)) => needs_probe.push(id.clone()),
                (_, None) => {} // replica vanished since sampling; drop it silently
            }
        }
    }

    if fresh_available.is_empty() && needs_probe.is_empty() {
        return TierResult::Exhausted;
    }

    // Background-refresh shortcut: one candidate is fresh and
    // immediately usable, the other just needs its cache entry
    // refreshed. Bind to the fresh one now and let the stale one warm
    // in the background rather than making this request wait on it.
    if candidates.len() == 2 && fresh_available.len() == 1 && needs_probe.len() == 1 {
        let (winner_id, winner_q) = fresh_available.into_iter().next().unwrap();
        let stale_id = needs_probe.into_iter().next().unwrap();
        let bg_shared = shared.clone();
        tokio::spawn(async move {
            let _ = probe_one(&bg_shared, &stale_id, 0).await;
        });
        return bind_if_still_active(shared, req, winner_id, winner_q, attempt).await;
    }

    let probed = if needs_probe.is_empty() {
        Vec::new()
    } else {
        let probe_fut = probe_many(shared, &needs_probe, attempt);
        tokio::select! {
            results = probe_fut => results,
            _ = req.cancel.cancelled() => {
                // The spawned probe tasks inside `probe_many` keep
                // running independently of this `select!`, so their
                // results still land in the cache even though we stop
                // waiting on them here.
                return TierResult::Cancelled;
            }
        }
    };

    let mut contenders = fresh_available;
    for (id, outcome) in probed {
        if let ProbeOutcome::Available(q) = outcome {
            contenders.push((id, q));
        }
    }

    if contenders.is_empty() {
        return TierResult::Exhausted;
    }

    let winner = pick_shortest_queue(&contenders, shared.config.rng.as_ref());
    bind_if_still_active(shared, req, winner.0.clone(), winner.1, attempt).await
}

/// Power-of-two-choices: picks the contender with the shortest queue,
/// breaking ties via the configured RNG rather than always the first.
fn pick_shortest_queue<'a>(
    contenders: &'a [(ReplicaId, u32)],
    rng: &dyn crate::ranker::RngSource,
) -> &'a (ReplicaId, u32) {
    if contenders.len() == 1 {
        return &contenders[0];
    }
    let min = contenders.iter().map(|(_, q)| *q).min().expect("non-empty");
    let tied: Vec<&(ReplicaId, u32)> = contenders.iter().filter(|(_, q)| *q == min).collect();
    if tied.len() == 1 {
        return tied[0];
    }
    let (a, _) = rng.sample_two(tied.len());
    tied[a]
}

async fn probe_many(
    shared: &Arc<RouterShared>,
    ids: &[ReplicaId],
    attempt: u32,
) -> Vec<(ReplicaId, ProbeOutcome)> {
    let mut handles = Vec::with_capacity(ids.len());
    for id in ids {
        let shared = shared.clone();
        let id = id.clone();
        handles.push(tokio::spawn(
            async move { probe_one(&shared, &id, attempt).await },
        ));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(result) = handle.await {
            results.push(result);
        }
    }
    results
}

async fn probe_one(shared: &Arc<RouterShared>, id: &ReplicaId, attempt: u32) -> (ReplicaId, ProbeOutcome) {
    let handle = shared.state.lock().replicas.get(id);
    let Some(handle) = handle else {
        return (id.clone(), ProbeOutcome::PermanentlyDead);
    };

    let base = Duration::from_secs_f64(shared.config.queue_len_response_deadline_s);
    let max = Duration::from_secs_f64(shared.config.max_queue_len_response_deadline_s);
    let deadline = deadline_for_attempt(base, max, attempt);

    let outcome = probe_replica(handle.as_ref(), deadline).await;
    record_probe_outcome(shared, id, &outcome, deadline.as_secs_f64());
    (id.clone(), outcome)
}

fn record_probe_outcome(shared: &Arc<RouterShared>, id: &ReplicaId, outcome: &ProbeOutcome, deadline_s: f64) {
    let now = shared.config.clock.now_s();
    let mut evicted = false;

    {
        let mut state = shared.state.lock();
        match outcome {
            ProbeOutcome::Available(q) | ProbeOutcome::AtCapacity(q) => {
                if let Some(cache) = state.queue_len_cache.as_mut() {
                    cache.update(id.clone(), *q, now);
                }
            }
            ProbeOutcome::PermanentlyDead => {
                state.replicas.remove(id);
                if let Some(cache) = state.queue_len_cache.as_mut() {
                    cache.remove(id);
                }
                evicted = true;
            }
            ProbeOutcome::TransientUnavailable | ProbeOutcome::TimedOut => {}
        }
    }

    shared.emit(RouterEvent::ProbeAttempted {
        replica_id: id.clone(),
        deadline_s,
        outcome: outcome.into(),
        timestamp: std::time::Instant::now(),
    });

    if evicted {
        shared.emit(RouterEvent::ReplicaEvicted {
            replica_id: id.clone(),
            timestamp: std::time::Instant::now(),
        });
        shared.replicas_updated.raise();
    }
}

/// Re-checks the replica is still active (it may have been evicted by
/// a concurrent probe between sampling and binding) and the request
/// hasn't been cancelled in the meantime before handing out the bind.
async fn bind_if_still_active(
    shared: &Arc<RouterShared>,
    req: &PendingRequest,
    id: ReplicaId,
    _queue_len: u32,
    attempt: u32,
) -> TierResult {
    if req.cancel.is_cancelled() {
        return TierResult::Cancelled;
    }

    let handle = shared.state.lock().replicas.get(&id);
    match handle {
        Some(handle) => {
            shared.emit(RouterEvent::Bound {
                request_id: req.request_id.clone(),
                replica_id: id,
                attempt,
                timestamp: std::time::Instant::now(),
            });
            TierResult::Bound(handle)
        }
        None => TierResult::Exhausted,
    }
}

/// Eager probe issued right after a replica is first observed, so its
/// queue-length cache entry is warm before the first request considers
/// it instead of starting cold.
pub(crate) async fn warm_cache_for(shared: &Arc<RouterShared>, id: &ReplicaId) {
    let _ = probe_one(shared, id, 0).await;
}
