//! Shared error types for the Conexus gateway.
//!
//! Routing rejections are not errors; they are reported as
//! `RouteOutcome` values by the router. The types here cover the registry
//! and identity layers, whose failures callers are expected to handle.

use thiserror::Error;

/// Errors from agent registry operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An ACTIVE record for this identity already exists.
    #[error("Identity already registered: {0}")]
    DuplicateIdentity(String),

    /// No ACTIVE record exists for this identity.
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// The registry reached its configured capacity.
    #[error("Registry full: capacity {capacity}")]
    RegistryFull {
        /// The configured maximum number of agents.
        capacity: usize,
    },
}

/// Alias for registry results.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors from key handling and signature encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The public key is not a valid hex-encoded Ed25519 key.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The secret key is not a valid hex-encoded Ed25519 seed.
    #[error("Invalid secret key: {0}")]
    InvalidSecretKey(String),

    /// The signature could not be decoded.
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),

    /// The identity string is not a Conexus DID.
    #[error("Not a conexus DID: {0}")]
    InvalidDid(String),
}
