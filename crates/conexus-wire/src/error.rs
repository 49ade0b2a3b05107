//! Errors from the wire protocol layer.

use conexus_types::error::IdentityError;
use thiserror::Error;

/// Errors raised while framing, connecting or registering.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("Registration rejected ({code}): {message}")]
    Rejected { code: i32, message: String },
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Invalid gateway configuration: {0}")]
    Config(String),
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<WireError>,
    },
    #[error("Cancelled")]
    Cancelled,
}
