//! Background tasks: inactivity sweep and registry event accounting.

use crate::metrics::GatewayMetrics;
use chrono::Utc;
use conexus_wire::{AgentRegistry, RegistryEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Periodically evict agents silent for longer than `timeout`.
///
/// Runs until `shutdown` turns `true` or its sender is dropped.
pub fn spawn_sweeper(
    registry: AgentRegistry,
    metrics: Arc<GatewayMetrics>,
    interval: Duration,
    timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        info!(
            interval_secs = interval.as_secs(),
            timeout_secs = timeout.as_secs(),
            "inactivity sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = registry.sweep(Utc::now(), timeout);
                    metrics.record_sweep();
                    if !evicted.is_empty() {
                        info!(count = evicted.len(), "swept inactive agents");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("inactivity sweeper stopped");
    })
}

/// Feed registry lifecycle events into `metrics`.
pub fn spawn_event_counter(
    mut events: broadcast::Receiver<RegistryEvent>,
    metrics: Arc<GatewayMetrics>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => metrics.record_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event counter lagged; counts are approximate");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("event counter stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conexus_wire::ConnectionHandle;

    #[tokio::test]
    async fn test_sweeper_evicts_silent_agents() {
        let registry = AgentRegistry::new(16);
        let (handle, _endpoint) = ConnectionHandle::channel(4);
        registry
            .register("did:conexus:aa", "aa", vec![], handle)
            .unwrap();

        let metrics = Arc::new(GatewayMetrics::new());
        let (tx, rx) = watch::channel(false);
        let task = spawn_sweeper(
            registry.clone(),
            metrics.clone(),
            Duration::from_millis(20),
            Duration::ZERO,
            rx,
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        task.await.unwrap();
        assert!(registry.resolve("did:conexus:aa").is_none());
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_sender_dropped() {
        let (tx, rx) = watch::channel(false);
        let task = spawn_sweeper(
            AgentRegistry::new(1),
            Arc::new(GatewayMetrics::new()),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            rx,
        );
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_event_counter_records_lifecycle() {
        let registry = AgentRegistry::new(16);
        let metrics = Arc::new(GatewayMetrics::new());
        let (tx, rx) = watch::channel(false);
        let task = spawn_event_counter(registry.subscribe(), metrics.clone(), rx);

        let (handle, _endpoint) = ConnectionHandle::channel(4);
        registry
            .register("did:conexus:bb", "bb", vec![], handle)
            .unwrap();
        assert!(registry.unregister("did:conexus:bb"));

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snap = metrics.snapshot(0, Default::default());
                if snap.registrations == 1 && snap.unregistrations == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
