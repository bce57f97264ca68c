use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot, broadcastable cancellation signal.
///
/// Owned by a single [`crate::TaskWorker`] and used to interrupt its
/// poll-interval sleep: the loop races [`CancelSignal::cancelled`] against
/// the timer with `tokio::select!`. Fires at most once and cannot be reset.
///
/// Every wait begun after cancellation resolves immediately — there is no
/// missed-signal window, because waiters register with the `Notify` before
/// re-checking the flag.
pub struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Fire the signal. Idempotent; later calls are no-ops.
    pub fn cancel(&self) {
        // Flag first, wake second: a waiter woken here re-reads `true`.
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve as soon as the signal has fired (immediately if it already
    /// has).
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

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
