//! Conexus signaling protocol: agent-to-agent session negotiation.
//!
//! Agents connect to a gateway over TCP, register a signed identity, then
//! exchange signed OFFER/ANSWER/ICE_CANDIDATE envelopes through it.
//!
//! ## Architecture
//!
//! - **AgentRegistry**: identity → connection handle + liveness, with sweep eviction
//! - **SignatureVerifier**: checks envelope and registration signatures
//! - **MessageRouter**: validates envelopes and forwards them to recipients
//! - **GatewayNode**: TCP listener, registration handshake, per-connection tasks
//! - **GatewayClient**: agent-side connection, established through a `RetryManager`

pub mod client;
pub mod error;
pub mod gateway;
pub mod message;
pub mod registry;
pub mod router;
pub mod verify;

pub use client::{ClientConfig, GatewayClient};
pub use error::WireError;
pub use gateway::GatewayNode;
pub use message::{WireFrame, WireFrameKind};
pub use registry::{AgentRegistry, ConnectionHandle, RegistryEvent};
pub use router::{MessageRouter, RouteOutcome, RouterStats, RouterStatsSnapshot};
pub use verify::{Ed25519Verifier, HmacSha256Verifier, SignatureVerifier};
