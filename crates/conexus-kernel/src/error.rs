//! Kernel-specific error types.

use conexus_runtime::retry::RetryConfigError;
use conexus_types::error::IdentityError;
use conexus_wire::WireError;
use thiserror::Error;

/// Kernel error type.
#[derive(Error, Debug)]
pub enum KernelError {
    /// The kernel failed to boot.
    #[error("Boot failed: {0}")]
    BootFailed(String),

    /// The `[retry]` section is invalid.
    #[error("Invalid retry config: {0}")]
    RetryConfig(#[from] RetryConfigError),

    /// The configured gateway identity could not be loaded.
    #[error("Invalid gateway identity: {0}")]
    Identity(#[from] IdentityError),

    /// A wire-layer failure (bind, verifier setup).
    #[error(transparent)]
    Wire(#[from] WireError),

    /// `start` called on a running kernel.
    #[error("Kernel already started")]
    AlreadyStarted,
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
