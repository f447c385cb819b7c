//! A minimal cooperative cancellation token, composed with per-call
//! timeouts by [`crate::transport`]. Every suspension point in the engines
//! (`upload`, `download`, and transitively `wisp-p2p`) observes one of
//! these.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct CancelToken(Arc<Inner>);

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once cancelled; never resolves otherwise.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            let notified = self.0.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

/// A child token that fires when either `self` or `parent` fires. Mirrors
/// the spec's "timeout composed with parent-cancel" suspension contract.
pub fn child_of(parent: Option<&CancelToken>) -> CancelToken {
    let child = CancelToken::new();
    if let Some(parent) = parent {
        let parent = parent.clone();
        let child_clone = child.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            child_clone.cancel();
        });
    }
    child
}
