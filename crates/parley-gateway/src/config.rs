use std::time::Duration;

/// Tunables for the presence & relay gateway.
///
/// Defaults reproduce the plain relay: no request timeout, no session
/// enforcement, silent drops, and `join` trusted as-is.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Capacity of each connection's outbound queue. Events beyond it are dropped.
    pub outbound_capacity: usize,
    /// Largest inbound WebSocket message accepted.
    pub max_message_bytes: usize,
    /// Expire unanswered connection requests after this long.
    pub request_timeout: Option<Duration>,
    /// Only relay messages between users who completed the handshake.
    pub enforce_sessions: bool,
    /// Tell the sender with `deliveryFailed` when something is dropped.
    pub notify_undeliverable: bool,
    /// When set, `join` must carry a JWT signed with this secret.
    pub join_secret: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            max_message_bytes: 1024 * 1024,
            request_timeout: None,
            enforce_sessions: false,
            notify_undeliverable: false,
            join_secret: None,
        }
    }
}
