//! Locality- and load-aware request router.
//!
//! [`Router`] dispatches requests across a pool of replicas using a
//! tiered power-of-two-choices strategy: candidates are ranked into
//! locality and multiplexed-model tiers, two are sampled per tier, and
//! whichever reports the shorter queue wins. Queue lengths are served
//! from a short-lived cache where possible and probed directly
//! otherwise, with deadline-bounded, exponentially backed-off retries
//! when every sampled candidate is unavailable.
//!
//! Enable the `tracing` feature for structured logging of routing
//! decisions, and `metrics` for counters on probes, binds, evictions
//! and cancellations.

mod cache;
mod clock;
mod config;
mod error;
mod events;
mod pending;
mod probe;
mod ranker;
mod replica;
mod replica_set;
mod router;
mod worker;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{RouterConfig, RouterConfigBuilder};
pub use error::RouterError;
pub use events::RouterEvent;
pub use pending::CancelSignal;
pub use probe::ProbeOutcome;
pub use ranker::{RandRng, RngSource, Tier};
pub use replica::{BoxFuture, ProbeError, ReplicaHandle, ReplicaId};
pub use router::{RequestSpec, Router};
