//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the consumer-facing feed contract and the services
//! that present its state to users.

/// Port interface implemented by the feed client.
pub mod ports;

/// Status indicator and manual retry services.
pub mod services;
