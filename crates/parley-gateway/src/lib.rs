//! Presence & session relay.
//!
//! Tracks which users hold a live connection, carries the connection-request
//! handshake between two of them, and relays their opaque ciphertext.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod negotiator;
pub mod registry;
pub mod router;
pub mod sessions;

pub use config::GatewayConfig;
pub use dispatcher::Dispatcher;
