//! Gateway configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the gateway authenticates envelopes and registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Ed25519 signatures checked against each agent's registered key.
    #[default]
    Ed25519,
    /// HMAC-SHA256 with a pre-shared secret common to all agents.
    SharedSecret,
}

/// Settings for the gateway listener, registry and router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the TCP listener binds to.
    pub listen_addr: String,
    /// Agents silent for longer than this are evicted.
    pub agent_timeout_secs: u64,
    /// Interval between registry sweeps.
    pub sweep_interval_secs: u64,
    /// Maximum number of concurrently registered agents.
    pub max_agents: usize,
    /// Largest accepted frame body.
    pub max_frame_bytes: u32,
    /// A connection that has not registered within this window is closed.
    pub handshake_timeout_secs: u64,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_depth: usize,
    /// Echo undeliverable envelopes back to their sender as ERROR envelopes.
    pub notify_undeliverable: bool,
    /// Authentication scheme.
    pub auth: AuthMode,
    /// Pre-shared key, required when `auth = "shared_secret"`.
    pub shared_secret: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7400".to_string(),
            agent_timeout_secs: 300,
            sweep_interval_secs: 30,
            max_agents: 10_000,
            max_frame_bytes: 10 * 1024 * 1024,
            handshake_timeout_secs: 10,
            outbound_queue_depth: 256,
            notify_undeliverable: true,
            auth: AuthMode::Ed25519,
            shared_secret: String::new(),
        }
    }
}

impl GatewayConfig {
    /// Eviction timeout as a `Duration`.
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    /// Sweep interval as a `Duration`. Never zero.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Registration deadline as a `Duration`. Never zero.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs.max(1))
    }
}
