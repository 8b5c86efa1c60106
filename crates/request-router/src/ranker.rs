//! Candidate ranker: produces ordered tiers of replicas to try for a
//! given request, and samples "power of two choices" from a tier.

use crate::config::RouterConfig;
use crate::replica::ReplicaId;
use crate::replica_set::ReplicaSet;

/// An unordered set of candidate replicas sharing a ranking class.
pub type Tier = Vec<ReplicaId>;

/// Injectable sampling source, so tests can make candidate selection
/// deterministic (the same way
/// `tower_resilience_healthcheck::selector::SelectionStrategy::Custom`
/// takes an injected `Arc<dyn Fn>`).
pub trait RngSource: Send + Sync {
    /// Samples up to two distinct indices in `0..len`. Returns `(a,
    /// None)` when `len == 1`.
    fn sample_two(&self, len: usize) -> (usize, Option<usize>);
}

/// Default RNG source, backed by `rand::rng()`.
#[derive(Default)]
pub struct RandRng;

impl RngSource for RandRng {
    fn sample_two(&self, len: usize) -> (usize, Option<usize>) {
        use rand::Rng;
        assert!(len > 0, "cannot sample from an empty tier");
        if len == 1 {
            return (0, None);
        }
        let mut rng = rand::rng();
        let first = rng.random_range(0..len);
        let mut second = rng.random_range(0..len - 1);
        if second >= first {
            second += 1;
        }
        (first, Some(second))
    }
}

/// Samples up to two distinct replica ids from `tier` using `rng`.
pub fn sample_from_tier(tier: &Tier, rng: &dyn RngSource) -> Vec<ReplicaId> {
    if tier.is_empty() {
        return Vec::new();
    }
    let (a, b) = rng.sample_two(tier.len());
    let mut out = vec![tier[a].clone()];
    if let Some(b) = b {
        out.push(tier[b].clone());
    }
    out
}

/// Tier M1 (replicas serving the requested model), followed by one tier
/// per distinct loaded-model count among the rest, ascending (fewer
/// cached models ranked first; a replica with no models loaded at all
/// still gets its own tier at count 0). Replicas already placed in M1
/// are excluded from every later tier.
pub fn rank_replicas_via_multiplex(replicas: &ReplicaSet, model_id: &str) -> Vec<Tier> {
    let mut tiers = Vec::new();

    let m1 = replicas.by_model(model_id);
    let m1_set: std::collections::HashSet<&ReplicaId> = m1.iter().collect();
    if !m1.is_empty() {
        tiers.push(m1.clone());
    }

    let mut by_count: std::collections::BTreeMap<usize, Tier> = std::collections::BTreeMap::new();
    for id in replicas.all_ids() {
        if m1_set.contains(&id) {
            continue;
        }
        let count = replicas.model_count(&id);
        by_count.entry(count).or_default().push(id);
    }

    for (_, tier) in by_count {
        tiers.push(tier);
    }

    tiers
}

/// Tiers L1 (same node), L2 (same AZ), L3 (everything). Tiers that would
/// be empty are omitted rather than handed to a worker to discover are
/// already exhausted.
pub fn rank_replicas_via_locality(replicas: &ReplicaSet, config: &RouterConfig) -> Vec<Tier> {
    let mut tiers = Vec::new();

    if config.prefer_local_node_routing {
        let l1 = replicas.by_node(&config.self_node_id);
        if !l1.is_empty() {
            tiers.push(l1);
        }
    }

    if config.prefer_local_az_routing {
        if let Some(az) = &config.self_availability_zone {
            let l2 = replicas.by_az(az);
            if !l2.is_empty() {
                tiers.push(l2);
            }
        }
    }

    tiers.push(replicas.all_ids());
    tiers
}

/// Full tier ranking for a request: multiplex tiers first (subject to
/// the soft `multiplex_matching_timeout_s` bail-out), then locality
/// tiers over the whole active set.
pub fn rank_for_request(
    replicas: &ReplicaSet,
    config: &RouterConfig,
    model_id: Option<&str>,
    model_requested_at: f64,
    now: f64,
) -> Vec<Tier> {
    let mut tiers = Vec::new();

    if let Some(model_id) = model_id {
        let within_timeout = now - model_requested_at <= config.multiplex_matching_timeout_s;
        if within_timeout {
            tiers.extend(rank_replicas_via_multiplex(replicas, model_id));
        }
    }

    tiers.extend(rank_replicas_via_locality(replicas, config));
    tiers
}
