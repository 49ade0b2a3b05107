//! Core kernel for the Conexus signaling gateway.
//!
//! The kernel owns the agent registry, message router, gateway identity and
//! metrics, and runs the background tasks (sweep, event accounting) under a
//! single shutdown signal.

pub mod config;
pub mod error;
pub mod kernel;
pub mod metrics;
pub mod supervisor;
pub mod sweeper;

pub use config::KernelConfig;
pub use kernel::{GatewayKernel, HealthReport};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
