//! Command implementations.

pub mod init;
pub mod keygen;
pub mod start;
