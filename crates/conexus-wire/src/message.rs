//! Wire protocol frames.
//!
//! All communication between agents and the gateway uses JSON frames over
//! TCP. Each frame is prefixed with a 4-byte big-endian length header.

use crate::error::WireError;
use conexus_types::agent::AgentSummary;
use conexus_types::envelope::MessageEnvelope;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A wire protocol frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFrame {
    /// Unique frame ID. Replies reuse the ID of the frame they answer.
    pub id: String,
    /// Frame variant.
    #[serde(flatten)]
    pub kind: WireFrameKind,
}

/// The different kinds of wire frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireFrameKind {
    /// Sent by the gateway as soon as a connection is accepted.
    #[serde(rename = "challenge")]
    Challenge {
        /// Single-use value the registration proof must cover.
        nonce: String,
    },
    /// First agent frame on every connection: claim an identity.
    #[serde(rename = "register")]
    Register {
        /// Identity (DID) being claimed.
        identity: String,
        /// Hex-encoded public key for the identity.
        public_key: String,
        /// Advertised capabilities.
        #[serde(default)]
        capabilities: Vec<String>,
        /// Time of the claim, in milliseconds.
        timestamp: u64,
        /// Echo of the connection's challenge nonce.
        #[serde(default)]
        nonce: String,
        /// Signature over `register|identity|public_key|timestamp|nonce`.
        signature: String,
    },
    /// Registration accepted.
    #[serde(rename = "registered")]
    Registered {
        identity: String,
        session_id: String,
        /// Identity the gateway signs its own ERROR envelopes with.
        gateway_identity: String,
    },
    /// Agent is leaving; the gateway closes the connection.
    #[serde(rename = "unregister")]
    Unregister,
    /// A signaling envelope to route, or one being delivered.
    #[serde(rename = "signal")]
    Signal { envelope: MessageEnvelope },
    /// Find agents advertising a capability.
    #[serde(rename = "discover")]
    Discover {
        /// Case-insensitive substring matched against capabilities.
        capability: String,
    },
    /// Discovery results.
    #[serde(rename = "discover_result")]
    DiscoverResult { agents: Vec<AgentSummary> },
    /// Liveness check.
    #[serde(rename = "ping")]
    Ping,
    /// Pong response.
    #[serde(rename = "pong")]
    Pong {
        /// Gateway uptime in seconds.
        uptime_secs: u64,
    },
    /// Protocol-level error.
    #[serde(rename = "error")]
    Error {
        /// HTTP-style status code.
        code: i32,
        message: String,
    },
}

impl WireFrame {
    /// A frame with a fresh ID.
    pub fn new(kind: WireFrameKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
        }
    }

    /// A reply frame reusing `request_id`.
    pub fn reply(request_id: &str, kind: WireFrameKind) -> Self {
        Self {
            id: request_id.to_string(),
            kind,
        }
    }

    /// Wrap an envelope for delivery.
    pub fn signal(envelope: MessageEnvelope) -> Self {
        Self::new(WireFrameKind::Signal { envelope })
    }

    /// An error reply.
    pub fn error(request_id: &str, code: i32, message: impl Into<String>) -> Self {
        Self::reply(
            request_id,
            WireFrameKind::Error {
                code,
                message: message.into(),
            },
        )
    }
}

/// Error codes used in `error` frames.
pub mod codes {
    /// Frame body could not be parsed.
    pub const MALFORMED: i32 = 400;
    /// Frame sent before registration.
    pub const REGISTRATION_REQUIRED: i32 = 401;
    /// Registration signature did not verify, or the nonce was stale.
    pub const PROOF_FAILED: i32 = 403;
    /// No registration within the handshake timeout.
    pub const HANDSHAKE_TIMEOUT: i32 = 408;
    /// Identity already registered.
    pub const DUPLICATE_IDENTITY: i32 = 409;
    /// Registry at capacity.
    pub const REGISTRY_FULL: i32 = 503;
    /// Registry failed in a way the agent cannot fix.
    pub const INTERNAL: i32 = 500;
}

/// Encode a frame to bytes (4-byte big-endian length + JSON).
pub fn encode_frame(frame: &WireFrame) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(frame)?;
    let len = json.len() as u32;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON body into a frame.
pub fn decode_frame(body: &[u8]) -> Result<WireFrame, serde_json::Error> {
    serde_json::from_slice(body)
}

/// Write a framed message and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &WireFrame) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one raw frame body, enforcing `max_size`.
///
/// The body is returned undecoded so callers can answer malformed JSON
/// without tearing down the connection.
pub async fn read_frame_body<R>(reader: &mut R, max_size: u32) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > max_size {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }

    let mut body = vec![0u8; len as usize];
    match reader.read_exact(&mut body).await {
        Ok(_) => Ok(body),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(WireError::ConnectionClosed),
        Err(e) => Err(WireError::Io(e)),
    }
}

/// Read and decode one frame.
pub async fn read_frame<R>(reader: &mut R, max_size: u32) -> Result<WireFrame, WireError>
where
    R: AsyncRead + Unpin,
{
    let body = read_frame_body(reader, max_size).await?;
    Ok(decode_frame(&body)?)
}
