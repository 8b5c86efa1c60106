//! Core infrastructure shared by the request-router crates.
//!
//! Currently this is just the event system used for routing observability
//! (`choose_replica_for_request` outcomes, probe results, replica-set churn).

pub mod events;

pub use events::{EventListener, EventListeners, FnListener, ResilienceEvent};
