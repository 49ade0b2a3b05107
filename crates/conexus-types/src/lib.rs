//! Core types for the Conexus signaling gateway.
//!
//! This crate defines the data structures shared by the registry, router,
//! retry runtime and wire protocol. It contains no business logic.

pub mod agent;
pub mod config;
pub mod envelope;
pub mod error;
pub mod identity;
