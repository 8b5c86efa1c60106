//! Pending requests awaiting a bound replica, and their cancel signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::sync::oneshot;

use crate::error::RouterError;
use crate::replica::ReplicaHandle;

/// Caller-owned cancellation signal for a single request.
///
/// A level-triggered flag paired with a `Notify`, so a worker that
/// starts waiting *after* cancellation has already happened still wakes
/// immediately instead of blocking forever.
#[derive(Default)]
pub struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks the request cancelled. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once [`CancelSignal::cancel`] has been called, even if
    /// that happened before this call started.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

pub(crate) type ChooseResult = Result<Arc<dyn ReplicaHandle>, RouterError>;

/// An enqueued request. Immutable except for the cancel signal.
pub struct PendingRequest {
    pub request_id: String,
    pub(crate) internal_id: u64,
    pub multiplexed_model_id: Option<String>,
    pub created_at: f64,
    pub is_retry: bool,
    pub cancel: Arc<CancelSignal>,
    pub(crate) result_tx: oneshot::Sender<ChooseResult>,
}

/// Ordered sequence of [`PendingRequest`]s, FIFO by `created_at` (ties
/// broken by insertion order via `internal_id`). An ordered `Vec` with
/// O(n) insertion is fine at this scale; a binary heap would be an
/// equally valid choice.
#[derive(Default)]
pub struct PendingQueue {
    items: Vec<PendingRequest>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Inserts keeping `items` sorted by `(created_at, internal_id)`.
    pub fn push(&mut self, request: PendingRequest) {
        let key = (request.created_at, request.internal_id);
        let pos = self
            .items
            .partition_point(|r| (r.created_at, r.internal_id) <= key);
        self.items.insert(pos, request);
    }

    /// Pops the oldest request, silently discarding (not returning) any
    /// cancelled requests found ahead of it.
    pub fn pop_oldest_ready(&mut self) -> Option<PendingRequest> {
        while !self.items.is_empty() {
            let request = self.items.remove(0);
            if request.cancel.is_cancelled() {
                let _ = request.result_tx.send(Err(RouterError::Cancelled));
                continue;
            }
            return Some(request);
        }
        None
    }

    /// Removes a specific request by internal id, e.g. when the caller
    /// cancels while it's still queued (not yet picked up by a worker).
    pub fn remove(&mut self, internal_id: u64) -> Option<PendingRequest> {
        let pos = self.items.iter().position(|r| r.internal_id == internal_id)?;
        Some(self.items.remove(pos))
    }
}
