//! Gateway counters exposed through `GatewayKernel::metrics`.

use conexus_runtime::retry::RetryListener;
use conexus_wire::{RegistryEvent, RouterStatsSnapshot};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Lifetime counters for registry and retry activity.
///
/// Routing counters live in the router itself and are merged in by
/// [`GatewayMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    registrations: AtomicU64,
    unregistrations: AtomicU64,
    evictions: AtomicU64,
    sweeps: AtomicU64,
    retries: AtomicU64,
    retries_exhausted: AtomicU64,
}

/// Point-in-time view of all gateway counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connected_agents: usize,
    pub registrations: u64,
    pub unregistrations: u64,
    pub evictions: u64,
    pub sweeps: u64,
    pub delivered: u64,
    pub acknowledged: u64,
    pub rejected: u64,
    pub failed: u64,
    pub retries: u64,
    pub retries_exhausted: u64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one registry lifecycle event.
    pub fn record_event(&self, event: &RegistryEvent) {
        let counter = match event {
            RegistryEvent::Registered { .. } => &self.registrations,
            RegistryEvent::Unregistered { .. } => &self.unregistrations,
            RegistryEvent::Evicted { .. } => &self.evictions,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one completed sweep pass.
    pub fn record_sweep(&self) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, connected_agents: usize, routed: RouterStatsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            connected_agents,
            registrations: self.registrations.load(Ordering::Relaxed),
            unregistrations: self.unregistrations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            delivered: routed.delivered,
            acknowledged: routed.acknowledged,
            rejected: routed.rejected,
            failed: routed.failed,
            retries: self.retries.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
        }
    }
}

impl RetryListener for GatewayMetrics {
    fn on_retry(&self, attempt: u32, delay: Duration) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "retry scheduled");
    }

    fn on_exhausted(&self, _attempts: u32) {
        self.retries_exhausted.fetch_add(1, Ordering::Relaxed);
    }
}
