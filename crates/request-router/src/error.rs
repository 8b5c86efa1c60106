//! Errors surfaced by the router facade.
//!
//! Per the propagation policy: the router absorbs every replica-side
//! failure (timeouts, transient unavailability, permanent death) and
//! retries internally. The only failure a caller ever observes is
//! explicit cancellation.

use thiserror::Error;

/// The only error [`crate::Router::choose_replica_for_request`] can return.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RouterError {
    /// The caller cancelled the request's cancel signal before it was bound.
    #[error("request was cancelled before a replica was bound")]
    Cancelled,
}
