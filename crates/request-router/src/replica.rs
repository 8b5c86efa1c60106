//! The `ReplicaHandle` capability consumed by the router.
//!
//! The router never talks to a replica directly over a wire protocol; it
//! only calls through this trait. Production callers implement it as a
//! thin wrapper over whatever RPC stack fronts the deployment (gRPC,
//! actor handle, ...); that glue is out of scope here.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

/// Opaque identity of a replica: `(deployment_name, unique_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplicaId {
    pub deployment_name: String,
    pub unique_id: String,
}

impl ReplicaId {
    pub fn new(deployment_name: impl Into<String>, unique_id: impl Into<String>) -> Self {
        Self {
            deployment_name: deployment_name.into(),
            unique_id: unique_id.into(),
        }
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.deployment_name, self.unique_id)
    }
}

/// Failure modes a probe can report. `Timeout` is never constructed by
/// implementors directly: the router imposes it from the outside by
/// racing [`ReplicaHandle::get_queue_len`] against the deadline it was
/// given, so that the in-flight call is provably cancelled (dropped)
/// rather than merely abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The replica is reachable but cannot currently serve the probe
    /// (e.g. overloaded control plane); it stays in the active set.
    #[error("replica is transiently unavailable")]
    TransientUnavailable,
    /// The replica process is gone and will never respond again; the
    /// router evicts it from the active set on this outcome.
    #[error("replica is permanently dead")]
    PermanentlyDead,
    /// The deadline elapsed before the replica responded.
    #[error("probe timed out")]
    Timeout,
}

/// A boxed, `Send` future, used because this trait is used as a trait
/// object (`Arc<dyn ReplicaHandle>`) and stable `async fn` in traits
/// isn't dyn-compatible.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability the router uses to ask a replica how busy it is.
///
/// Implementations are expected to be cheap to query repeatedly and
/// `Send + Sync` so they can be shared across routing workers via `Arc`.
pub trait ReplicaHandle: Send + Sync {
    /// Stable identity of this replica.
    fn replica_id(&self) -> &ReplicaId;

    /// Node this replica is scheduled on. Empty string if unknown.
    fn node_id(&self) -> &str;

    /// Availability zone this replica lives in, if locality-aware
    /// routing needs it.
    fn availability_zone(&self) -> Option<&str>;

    /// Model ids currently multiplexed onto this replica.
    fn multiplexed_model_ids(&self) -> &HashSet<String>;

    /// Maximum number of requests this replica will accept concurrently.
    fn max_ongoing_requests(&self) -> u32;

    /// Ask the replica how many requests it currently has in flight.
    ///
    /// `deadline` is advisory context passed to the replica; the router
    /// separately enforces it as a hard wall-clock bound via
    /// [`tokio::time::timeout`] in [`crate::probe`].
    fn get_queue_len(&self, deadline: Duration) -> BoxFuture<'_, Result<u32, ProbeError>>;
}
