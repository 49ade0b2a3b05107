//! Agent records tracked by the gateway registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle status of an agent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    /// Registered and reachable.
    Active,
    /// Selected for eviction by a sweep, not yet removed.
    Expiring,
    /// Removed from the registry; the connection handle is released.
    Removed,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Expiring => write!(f, "expiring"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// Point-in-time view of a registered agent.
///
/// Records handed out by the registry are copies; mutating one never
/// affects the registry's own state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Globally unique identity (DID).
    pub identity: String,
    /// Hex-encoded Ed25519 public key the agent registered with.
    pub public_key: String,
    /// Services the agent advertises. Informational only.
    pub capabilities: BTreeSet<String>,
    /// When the record was created.
    pub registered_at: DateTime<Utc>,
    /// Last frame or heartbeat received from the agent.
    pub last_seen_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: AgentStatus,
    /// Identifies the transport session that owns this record.
    pub session_id: String,
}

impl AgentRecord {
    /// Whether the record is reachable for routing.
    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }

    /// Summary suitable for sending to other agents during discovery.
    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            identity: self.identity.clone(),
            capabilities: self.capabilities.iter().cloned().collect(),
            registered_at: self.registered_at,
        }
    }
}

/// The public part of an agent record, shared with other agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    /// Agent identity (DID).
    pub identity: String,
    /// Advertised capabilities.
    pub capabilities: Vec<String>,
    /// When the agent registered.
    pub registered_at: DateTime<Utc>,
}
