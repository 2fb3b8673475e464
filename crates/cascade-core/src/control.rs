//! Per-simulation abort control.
//!
//! A [`SimulationControl`] is shared (via [`Arc`](std::sync::Arc)) between
//! the orchestrator's registry and the task running the simulation. The
//! round runner races its in-flight calls against
//! [`SimulationControl::cancelled`], so an abort drops outstanding backend
//! calls instead of waiting for them.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Shared cancellation state for one running simulation.
#[derive(Debug, Default)]
pub struct SimulationControl {
    /// Whether an abort has been requested.
    abort_requested: AtomicBool,

    /// Wakes every task parked in [`cancelled`](Self::cancelled).
    notify: Notify,
}

impl SimulationControl {
    /// Create a control with no abort requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the simulation stop as soon as possible.
    pub fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Whether an abort has been requested.
    pub fn is_abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::Acquire)
    }

    /// Resolve once an abort has been requested.
    ///
    /// Returns immediately if the abort already happened.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent
            // `request_abort` cannot slip between the two.
            let notified = self.notify.notified();
            if self.is_abort_requested() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn cancelled_resolves_after_abort() {
        let control = Arc::new(SimulationControl::new());
        let waiter = {
            let control = Arc::clone(&control);
            tokio::spawn(async move { control.cancelled().await })
        };
        tokio::task::yield_now().await;
        assert!(!control.is_abort_requested());
        control.request_abort();
        let joined = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(joined, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn cancelled_is_immediate_once_aborted() {
        let control = SimulationControl::new();
        control.request_abort();
        let done = tokio::time::timeout(Duration::from_millis(50), control.cancelled()).await;
        assert!(done.is_ok());
    }
}
