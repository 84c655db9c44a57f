//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for the price feed with no
//! I/O. Everything here is plain Rust with serialization support.

/// Connection lifecycle state and consumer-visible status.
pub mod streaming;

/// Desired symbol set tracking.
pub mod subscription;

/// Last-known price snapshot store.
pub mod snapshot;
