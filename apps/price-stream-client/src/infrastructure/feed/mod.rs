//! Price Feed WebSocket Client
//!
//! Adapter for the real-time price feed:
//!
//! - `messages`: wire types
//! - `codec`: JSON frame encoding/decoding
//! - `reconnect`: bounded exponential backoff
//! - `heartbeat`: keepalive pings and pong bookkeeping
//! - `dispatcher`: routes inbound frames into the snapshot store
//! - `client`: connection supervisor and consumer handle

pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;

pub use client::{
    FeedDiagnostics, PriceStreamClient, PriceStreamConfig, PriceStreamHandle, StreamClientError,
};
