//! Runtime utilities for the Conexus gateway.
//!
//! Currently hosts the [`retry`] module: a backoff-driven wrapper for any
//! fallible async operation, used for outbound connection establishment.

pub mod retry;

pub use retry::{
    BackoffStrategy, RetryConfig, RetryConfigError, RetryError, RetryListener, RetryManager,
    RetryOutcome,
};
