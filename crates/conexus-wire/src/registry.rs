//! Agent registry: tracks which agents are connected and reachable.
//!
//! The [`AgentRegistry`] maps each identity to its [`AgentRecord`] and the
//! [`ConnectionHandle`] of the transport session that registered it. All
//! mutations go through one global `RwLock` critical section, so register,
//! unregister, touch and sweep never interleave for any identity.
//!
//! Records handed out by the registry are copies. Removing a record drops
//! its connection handle, which closes the owning connection.

use crate::message::WireFrame;
use chrono::{DateTime, Utc};
use conexus_types::agent::{AgentRecord, AgentStatus};
use conexus_types::error::{RegistryError, RegistryResult};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

/// Capacity of the registry event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Connection handles
// ---------------------------------------------------------------------------

/// Writable side of a transport session, owned by its registry entry.
///
/// Dropping or releasing the handle signals the connection to close.
#[derive(Debug)]
pub struct ConnectionHandle {
    session_id: String,
    outbound: mpsc::Sender<WireFrame>,
    close: watch::Sender<bool>,
}

/// The connection task's half of a [`ConnectionHandle`].
#[derive(Debug)]
pub struct ConnectionEndpoint {
    /// Frames to write to the socket.
    pub outbound: mpsc::Receiver<WireFrame>,
    /// Sender the connection uses for its own replies.
    pub replies: mpsc::Sender<WireFrame>,
    /// Turns `true` (or closes) when the registry releases the handle.
    pub closed: watch::Receiver<bool>,
}

/// Why a frame could not be enqueued for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// No active record for the identity.
    UnknownAgent,
    /// The agent's outbound queue is full.
    QueueFull,
    /// The agent's connection is gone.
    Closed,
}

impl ConnectionHandle {
    /// Create a handle for a new session with a bounded outbound queue.
    pub fn channel(queue_depth: usize) -> (Self, ConnectionEndpoint) {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_depth.max(1));
        let (close_tx, close_rx) = watch::channel(false);
        let handle = Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            outbound: outbound_tx.clone(),
            close: close_tx,
        };
        let endpoint = ConnectionEndpoint {
            outbound: outbound_rx,
            replies: outbound_tx,
            closed: close_rx,
        };
        (handle, endpoint)
    }

    /// The session this handle belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Enqueue a frame without waiting.
    pub fn try_send(&self, frame: WireFrame) -> Result<(), DeliveryError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Signal the connection to close.
    pub fn release(&self) {
        let _ = self.close.send(true);
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A registry state change, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered { identity: String, session_id: String },
    Unregistered { identity: String },
    Evicted { identity: String },
}

/// Result of recording an envelope's arrival for its sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityCheck {
    /// Timestamp accepted; liveness updated.
    Accepted,
    /// Timestamp older than the last accepted one.
    Stale { last_accepted: u64 },
    /// No active record for the sender.
    Unknown,
}

struct AgentEntry {
    record: AgentRecord,
    handle: ConnectionHandle,
    last_timestamp: Option<u64>,
}

impl AgentEntry {
    fn remove(mut self) -> AgentRecord {
        self.record.status = AgentStatus::Removed;
        self.handle.release();
        self.record
    }
}

/// Thread-safe registry of connected agents.
#[derive(Clone)]
pub struct AgentRegistry {
    agents: Arc<RwLock<HashMap<String, AgentEntry>>>,
    events: broadcast::Sender<RegistryEvent>,
    max_agents: usize,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("active", &self.active_count())
            .field("max_agents", &self.max_agents)
            .finish()
    }
}

impl AgentRegistry {
    /// Create an empty registry holding at most `max_agents` records.
    pub fn new(max_agents: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            events,
            max_agents,
        }
    }

    /// Register an agent and take ownership of its connection handle.
    ///
    /// Fails with `DuplicateIdentity` if the identity is already active;
    /// callers replace a stale session by unregistering it first.
    pub fn register(
        &self,
        identity: &str,
        public_key: &str,
        capabilities: impl IntoIterator<Item = String>,
        handle: ConnectionHandle,
    ) -> RegistryResult<AgentRecord> {
        self.insert(identity, public_key, capabilities, handle, None)
    }

    /// Like [`register`](Self::register), but the new session's replay
    /// window starts at `timestamp`: older envelopes are stale.
    pub fn register_at(
        &self,
        identity: &str,
        public_key: &str,
        capabilities: impl IntoIterator<Item = String>,
        handle: ConnectionHandle,
        timestamp: u64,
    ) -> RegistryResult<AgentRecord> {
        self.insert(identity, public_key, capabilities, handle, Some(timestamp))
    }

    fn insert(
        &self,
        identity: &str,
        public_key: &str,
        capabilities: impl IntoIterator<Item = String>,
        handle: ConnectionHandle,
        last_timestamp: Option<u64>,
    ) -> RegistryResult<AgentRecord> {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        if agents.contains_key(identity) {
            return Err(RegistryError::DuplicateIdentity(identity.to_string()));
        }
        if agents.len() >= self.max_agents {
            return Err(RegistryError::RegistryFull {
                capacity: self.max_agents,
            });
        }

        let now = Utc::now();
        let record = AgentRecord {
            identity: identity.to_string(),
            public_key: public_key.to_string(),
            capabilities: capabilities.into_iter().collect::<BTreeSet<_>>(),
            registered_at: now,
            last_seen_at: now,
            status: AgentStatus::Active,
            session_id: handle.session_id().to_string(),
        };
        agents.insert(
            identity.to_string(),
            AgentEntry {
                record: record.clone(),
                handle,
                last_timestamp,
            },
        );
        drop(agents);

        info!(identity = %identity, session = %record.session_id, "agent registered");
        let _ = self.events.send(RegistryEvent::Registered {
            identity: identity.to_string(),
            session_id: record.session_id.clone(),
        });
        Ok(record)
    }

    /// Mark an agent as seen now.
    pub fn touch(&self, identity: &str) -> RegistryResult<()> {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        match agents.get_mut(identity) {
            Some(entry) => {
                entry.record.last_seen_at = Utc::now();
                Ok(())
            }
            None => Err(RegistryError::UnknownAgent(identity.to_string())),
        }
    }

    /// Mark `session_id` as seen now.
    ///
    /// Fails with `UnknownAgent` once the identity is gone or belongs to a
    /// newer session.
    pub fn touch_session(&self, identity: &str, session_id: &str) -> RegistryResult<()> {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        match agents.get_mut(identity) {
            Some(entry) if entry.record.session_id == session_id => {
                entry.record.last_seen_at = Utc::now();
                Ok(())
            }
            _ => Err(RegistryError::UnknownAgent(identity.to_string())),
        }
    }

    /// Remove an agent and release its connection. Idempotent.
    ///
    /// Returns whether a record was removed.
    pub fn unregister(&self, identity: &str) -> bool {
        let removed = {
            let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
            agents.remove(identity)
        };
        self.finish_unregister(removed)
    }

    /// Remove an agent only if its record still belongs to `session_id`.
    pub fn unregister_session(&self, identity: &str, session_id: &str) -> bool {
        let removed = {
            let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
            match agents.get(identity) {
                Some(entry) if entry.record.session_id == session_id => agents.remove(identity),
                _ => None,
            }
        };
        self.finish_unregister(removed)
    }

    fn finish_unregister(&self, removed: Option<AgentEntry>) -> bool {
        let Some(entry) = removed else {
            return false;
        };
        let record = entry.remove();
        info!(identity = %record.identity, session = %record.session_id, "agent unregistered");
        let _ = self.events.send(RegistryEvent::Unregistered {
            identity: record.identity,
        });
        true
    }

    /// Look up an active agent.
    pub fn resolve(&self, identity: &str) -> Option<AgentRecord> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.get(identity).map(|e| e.record.clone())
    }

    /// Point-in-time copy of all active agents, oldest registration first.
    pub fn list_active(&self) -> Vec<AgentRecord> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        let mut records: Vec<AgentRecord> = agents
            .values()
            .filter(|e| e.record.is_active())
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        records
    }

    /// Number of active agents.
    pub fn active_count(&self) -> usize {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.len()
    }

    /// Agents advertising a capability containing `query` (case-insensitive).
    pub fn find_by_capability(&self, query: &str) -> Vec<AgentRecord> {
        let query_lower = query.to_lowercase();
        self.list_active()
            .into_iter()
            .filter(|r| {
                r.capabilities
                    .iter()
                    .any(|c| c.to_lowercase().contains(&query_lower))
            })
            .collect()
    }

    /// Evict every agent silent for longer than `timeout` as of `now`.
    ///
    /// Records whose `last_seen_at` is later than `now` (registered or
    /// touched after the sweep's clock was read) are never evicted.
    pub fn sweep(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<AgentRecord> {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());

        let expired: Vec<String> = agents
            .iter_mut()
            .filter_map(|(identity, entry)| {
                let idle = now
                    .signed_duration_since(entry.record.last_seen_at)
                    .to_std()
                    .ok()?;
                if idle > timeout {
                    entry.record.status = AgentStatus::Expiring;
                    debug!(identity = %identity, idle_secs = idle.as_secs(), "agent expiring");
                    Some(identity.clone())
                } else {
                    None
                }
            })
            .collect();

        let evicted: Vec<AgentRecord> = expired
            .iter()
            .filter_map(|identity| agents.remove(identity))
            .map(AgentEntry::remove)
            .collect();
        drop(agents);

        for record in &evicted {
            info!(identity = %record.identity, session = %record.session_id, "agent evicted");
            let _ = self.events.send(RegistryEvent::Evicted {
                identity: record.identity.clone(),
            });
        }
        evicted
    }

    /// Atomically check an envelope timestamp against the sender's replay
    /// window and, if fresh, record it and refresh liveness.
    ///
    /// Equal timestamps are accepted; only strictly older ones are stale.
    pub fn accept_activity(&self, identity: &str, timestamp: u64) -> ActivityCheck {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = agents.get_mut(identity) else {
            return ActivityCheck::Unknown;
        };
        if let Some(last) = entry.last_timestamp {
            if timestamp < last {
                return ActivityCheck::Stale {
                    last_accepted: last,
                };
            }
        }
        entry.last_timestamp = Some(timestamp);
        entry.record.last_seen_at = Utc::now();
        ActivityCheck::Accepted
    }

    /// Enqueue a frame on an agent's connection without blocking.
    pub fn deliver(&self, identity: &str, frame: WireFrame) -> Result<(), DeliveryError> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        match agents.get(identity) {
            Some(entry) => entry.handle.try_send(frame),
            None => Err(DeliveryError::UnknownAgent),
        }
    }

    /// Subscribe to registry events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Remove every agent, releasing all connections. Used at shutdown.
    pub fn drain(&self) -> usize {
        let drained: Vec<AgentEntry> = {
            let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
            agents.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        for entry in drained {
            let record = entry.remove();
            let _ = self.events.send(RegistryEvent::Unregistered {
                identity: record.identity,
            });
        }
        if count > 0 {
            info!(count, "registry drained");
        }
        count
    }
}
