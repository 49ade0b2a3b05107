//! GatewayKernel: assembles and runs all gateway subsystems.

use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::metrics::{GatewayMetrics, MetricsSnapshot};
use crate::supervisor::Supervisor;
use crate::sweeper::{spawn_event_counter, spawn_sweeper};

use chrono::{DateTime, Utc};
use conexus_runtime::retry::{RetryListener, RetryManager};
use conexus_types::agent::AgentRecord;
use conexus_types::identity::AgentIdentity;
use conexus_wire::verify::verifier_for;
use conexus_wire::{AgentRegistry, GatewayNode, MessageRouter};
use dashmap::DashMap;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The gateway kernel: owns the registry, router, identity and background tasks.
pub struct GatewayKernel {
    /// Configuration the kernel booted with.
    pub config: KernelConfig,
    /// Shutdown signal shared by every task.
    pub supervisor: Supervisor,
    registry: AgentRegistry,
    router: Arc<MessageRouter>,
    identity: AgentIdentity,
    metrics: Arc<GatewayMetrics>,
    retry: RetryManager,
    start_time: Instant,
    started: AtomicBool,
    node: Mutex<Option<Arc<GatewayNode>>>,
    /// Background tasks by name.
    tasks: DashMap<&'static str, JoinHandle<()>>,
}

/// Liveness summary for operators.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub gateway_identity: String,
    pub listen_addr: Option<SocketAddr>,
    pub connected_agents: usize,
    pub uptime_secs: u64,
    pub timestamp: DateTime<Utc>,
}

impl GatewayKernel {
    /// Build every subsystem from `config`. Nothing listens until [`start`](Self::start).
    pub fn boot(config: KernelConfig) -> KernelResult<Arc<Self>> {
        let metrics = Arc::new(GatewayMetrics::new());
        let retry = RetryManager::new(config.retry.clone())?
            .with_listener(metrics.clone() as Arc<dyn RetryListener>);

        let identity = match config.identity_secret.as_deref() {
            Some(secret) => AgentIdentity::from_secret_hex(secret.trim())?,
            None => {
                let generated = AgentIdentity::generate();
                info!(gateway = %generated.did(), "no identity_secret configured, generated ephemeral identity");
                generated
            }
        };

        let registry = AgentRegistry::new(config.gateway.max_agents);
        let verifier = verifier_for(&config.gateway)?;
        let router = Arc::new(MessageRouter::new(registry.clone(), verifier));

        info!(
            gateway = %identity.did(),
            max_agents = config.gateway.max_agents,
            auth = ?config.gateway.auth,
            "kernel booted"
        );

        Ok(Arc::new(Self {
            config,
            supervisor: Supervisor::new(),
            registry,
            router,
            identity,
            metrics,
            retry,
            start_time: Instant::now(),
            started: AtomicBool::new(false),
            node: Mutex::new(None),
            tasks: DashMap::new(),
        }))
    }

    /// Bind the listener and spawn background tasks. Returns the bound address.
    pub async fn start(self: &Arc<Self>) -> KernelResult<SocketAddr> {
        if self.supervisor.is_shutting_down() {
            return Err(KernelError::BootFailed("kernel has been shut down".into()));
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(KernelError::AlreadyStarted);
        }

        self.tasks.insert(
            "events",
            spawn_event_counter(
                self.registry.subscribe(),
                self.metrics.clone(),
                self.supervisor.subscribe(),
            ),
        );

        let (node, accept_task) = match GatewayNode::start(
            self.config.gateway.clone(),
            self.router.clone(),
            self.identity.clone(),
            self.supervisor.subscribe(),
        )
        .await
        {
            Ok(started) => started,
            Err(e) => {
                self.started.store(false, Ordering::Release);
                if let Some((_, task)) = self.tasks.remove("events") {
                    task.abort();
                }
                return Err(e.into());
            }
        };
        let addr = node.local_addr();
        *self.node.lock().unwrap_or_else(|e| e.into_inner()) = Some(node);
        self.tasks.insert("gateway", accept_task);

        self.tasks.insert(
            "sweeper",
            spawn_sweeper(
                self.registry.clone(),
                self.metrics.clone(),
                self.config.gateway.sweep_interval(),
                self.config.gateway.agent_timeout(),
                self.supervisor.subscribe(),
            ),
        );

        info!(%addr, "kernel started");
        Ok(addr)
    }

    /// Stop accepting, close every agent connection and wait for background tasks.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown();
        let closed = self.registry.drain();
        info!(closed, "closed agent connections");

        let names: Vec<&'static str> = self.tasks.iter().map(|t| *t.key()).collect();
        for name in names {
            if let Some((_, task)) = self.tasks.remove(name) {
                if let Err(e) = task.await {
                    if e.is_panic() {
                        self.supervisor.record_task_failure(name);
                    } else {
                        warn!(task = name, "background task cancelled: {}", e);
                    }
                }
            }
        }
        info!("kernel stopped");
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: if self.supervisor.is_shutting_down() {
                "shutting_down"
            } else {
                "ok"
            },
            gateway_identity: self.identity.did().to_string(),
            listen_addr: self.local_addr(),
            connected_agents: self.registry.active_count(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            timestamp: Utc::now(),
        }
    }

    /// Active agents, oldest registration first, ties broken by identity.
    pub fn agents(&self) -> Vec<AgentRecord> {
        self.registry.list_active()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics
            .snapshot(self.registry.active_count(), self.router.stats())
    }

    /// A retry manager built from `[retry]`, reporting into the kernel's metrics.
    pub fn retry_manager(&self) -> RetryManager {
        self.retry.clone()
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Listener address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.node
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|node| node.local_addr())
    }
}
