use tracing::{debug, trace};

use parley_types::events::{DropReason, ServerEvent};

use crate::registry::{Delivery, Registry};
use crate::sessions::SessionTable;

/// Forwards message envelopes to the receiver's current handle.
///
/// Best effort and at most once: an unreachable receiver loses the message.
#[derive(Clone)]
pub struct RelayRouter {
    registry: Registry,
    sessions: SessionTable,
    enforce_sessions: bool,
}

impl RelayRouter {
    pub fn new(registry: Registry, sessions: SessionTable, enforce_sessions: bool) -> Self {
        Self {
            registry,
            sessions,
            enforce_sessions,
        }
    }

    /// Relay opaque `text` from `sender` to `receiver`, untouched.
    pub async fn relay(&self, sender: &str, receiver: &str, text: String) -> Delivery {
        if self.enforce_sessions && !self.sessions.is_paired(sender, receiver).await {
            debug!(%sender, %receiver, "Message between unpaired users dropped");
            return Delivery::Dropped(DropReason::NotPaired);
        }

        let bytes = text.len();
        let outcome = self
            .registry
            .send_to(
                receiver,
                ServerEvent::MessageReceived {
                    sender: sender.to_string(),
                    text,
                },
            )
            .await;

        match outcome {
            Delivery::Delivered => trace!(%sender, %receiver, bytes, "Message relayed"),
            Delivery::Dropped(reason) => debug!(%sender, %receiver, ?reason, "Message dropped"),
        }

        outcome
    }
}
