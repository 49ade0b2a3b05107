//! Process supervision: graceful shutdown and background task accounting.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{info, warn};

/// Shutdown signal manager.
pub struct Supervisor {
    /// Send side of the shutdown signal.
    shutdown_tx: watch::Sender<bool>,
    /// Receive side of the shutdown signal (clonable).
    shutdown_rx: watch::Receiver<bool>,
    /// Background tasks that ended with a panic.
    task_failures: AtomicU64,
}

impl Supervisor {
    /// Create a new supervisor.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            shutdown_tx: tx,
            shutdown_rx: rx,
            task_failures: AtomicU64::new(0),
        }
    }

    /// Get a receiver that will be notified on shutdown.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Trigger a graceful shutdown.
    pub fn shutdown(&self) {
        info!("Supervisor: initiating graceful shutdown");
        let _ = self.shutdown_tx.send(true);
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Record that a background task died.
    pub fn record_task_failure(&self, task: &str) {
        let total = self.task_failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(task, total_failures = total, "Background task failed");
    }

    pub fn task_failures(&self) -> u64 {
        self.task_failures.load(Ordering::Relaxed)
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal() {
        let supervisor = Supervisor::new();
        let rx = supervisor.subscribe();
        assert!(!supervisor.is_shutting_down());
        assert!(!*rx.borrow());

        supervisor.shutdown();
        assert!(supervisor.is_shutting_down());
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn test_subscriber_wakes_on_shutdown() {
        let supervisor = Supervisor::new();
        let mut rx = supervisor.subscribe();
        let waiter = tokio::spawn(async move {
            rx.changed().await.unwrap();
            *rx.borrow()
        });
        supervisor.shutdown();
        assert!(waiter.await.unwrap());
    }

    #[test]
    fn test_task_failure_count() {
        let supervisor = Supervisor::default();
        supervisor.record_task_failure("sweeper");
        supervisor.record_task_failure("events");
        assert_eq!(supervisor.task_failures(), 2);
    }
}
