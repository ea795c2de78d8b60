//! Cooperative cancellation signal for in-flight calls.
//!
//! A `CancelSignal` can be cloned and shared across tasks. When `cancel()`
//! is called on any clone, every clone observes it, and tasks suspended in
//! [`cancelled()`](CancelSignal::cancelled) wake up.
//!
//! ```
//! use queue_rpc::CancelSignal;
//!
//! let signal = CancelSignal::new();
//! let observer = signal.clone();
//!
//! signal.cancel();
//! assert!(observer.is_cancelled());
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cancellation signal for cooperative cancellation of RPC calls.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

impl CancelSignal {
    /// Create a new, untriggered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signal that fires by itself after `delay`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn cancel_after(delay: Duration) -> Self {
        // ---
        let signal = Self::new();
        let timer = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            timer.cancel();
        });
        signal
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the signal fires.
    pub async fn cancelled(&self) {
        // ---
        loop {
            // Registered before the flag check so a concurrent cancel() is not missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        // ---
        let signal = CancelSignal::new();
        let waiter = signal.clone();

        let task = tokio::spawn(async move { waiter.cancelled().await });
        tokio::task::yield_now().await;

        signal.cancel();
        timeout(Duration::from_millis(200), task)
            .await
            .expect("waiter not woken")
            .unwrap();
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        // ---
        let signal = CancelSignal::new();
        signal.cancel();
        signal.cancel();

        timeout(Duration::from_millis(50), signal.cancelled())
            .await
            .expect("should not wait");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fires() {
        // ---
        let signal = CancelSignal::cancel_after(Duration::from_secs(5));
        assert!(!signal.is_cancelled());

        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }
}
