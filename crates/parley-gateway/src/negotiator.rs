//! Connection-request handshake: request -> accept | reject.
//!
//! By default this is a pure forwarding function over the registry. Pending
//! requests are only remembered when something needs them: strict sessions
//! (a response must answer a real request) or a request timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use parley_types::events::{DropReason, ServerEvent};

use crate::config::GatewayConfig;
use crate::registry::{Delivery, Registry};
use crate::sessions::SessionTable;

/// The responder's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Accept { key_blob: String },
    Reject,
}

#[derive(Clone)]
pub struct Negotiator {
    inner: Arc<NegotiatorInner>,
}

struct NegotiatorInner {
    registry: Registry,
    sessions: SessionTable,
    /// (requester, receiver) -> id of the latest delivered request
    pending: Mutex<HashMap<(String, String), Uuid>>,
    enforce_sessions: bool,
    request_timeout: Option<Duration>,
}

impl Negotiator {
    pub fn new(registry: Registry, sessions: SessionTable, config: &GatewayConfig) -> Self {
        Self {
            inner: Arc::new(NegotiatorInner {
                registry,
                sessions,
                pending: Mutex::new(HashMap::new()),
                enforce_sessions: config.enforce_sessions,
                request_timeout: config.request_timeout,
            }),
        }
    }

    fn tracks_pending(&self) -> bool {
        self.inner.enforce_sessions || self.inner.request_timeout.is_some()
    }

    /// Forward a connection request to `receiver`.
    pub async fn submit_request(&self, sender: &str, receiver: &str, key_blob: String) -> Delivery {
        let key = key_fingerprint(&key_blob);
        let pair = (sender.to_string(), receiver.to_string());

        // Record before delivering so a fast answer always finds it
        let request_id = Uuid::new_v4();
        if self.tracks_pending() {
            self.inner.pending.lock().await.insert(pair.clone(), request_id);
        }

        let outcome = self
            .inner
            .registry
            .send_to(
                receiver,
                ServerEvent::RequestReceived {
                    sender: sender.to_string(),
                    key_blob,
                },
            )
            .await;

        match outcome {
            Delivery::Delivered => {
                info!(%sender, %receiver, %key, "Connection request forwarded");
                if let Some(timeout) = self.inner.request_timeout {
                    self.schedule_expiry(pair, request_id, timeout);
                }
            }
            Delivery::Dropped(reason) => {
                debug!(%sender, %receiver, ?reason, "Connection request dropped");
                if self.tracks_pending() {
                    let mut pending = self.inner.pending.lock().await;
                    if pending.get(&pair) == Some(&request_id) {
                        pending.remove(&pair);
                    }
                }
            }
        }

        outcome
    }

    /// Forward `responder`'s answer back to `requester`.
    pub async fn submit_response(&self, requester: &str, responder: &str, answer: Answer) -> Delivery {
        let was_pending = self.take_pending(requester, responder).await;
        if self.inner.enforce_sessions && !was_pending {
            debug!(%requester, %responder, "Response without a pending request dropped");
            return Delivery::Dropped(DropReason::NoPendingRequest);
        }

        let accepted = matches!(answer, Answer::Accept { .. });
        let event = match answer {
            Answer::Accept { key_blob } => ServerEvent::RequestAccepted {
                receiver: responder.to_string(),
                key_blob,
            },
            Answer::Reject => ServerEvent::RequestRejected {
                receiver: responder.to_string(),
            },
        };

        let outcome = self.inner.registry.send_to(requester, event).await;
        match outcome {
            Delivery::Delivered => {
                info!(%requester, %responder, accepted, "Connection response forwarded");
                if accepted && self.inner.enforce_sessions {
                    self.open_session(requester, responder).await;
                }
            }
            Delivery::Dropped(reason) => {
                debug!(%requester, %responder, ?reason, "Connection response dropped");
            }
        }

        outcome
    }

    /// `sender` leaves its chat with `peer`; the peer is told.
    pub async fn end_session(&self, sender: &str, peer: &str) -> Delivery {
        if self.inner.enforce_sessions {
            if self.inner.sessions.end(sender, peer).await.is_none() {
                debug!(%sender, %peer, "End of a session that does not exist");
                return Delivery::Dropped(DropReason::NotPaired);
            }
            info!(%sender, %peer, "Session ended");
        }

        self.inner
            .registry
            .send_to(
                peer,
                ServerEvent::SessionEnded {
                    peer: sender.to_string(),
                },
            )
            .await
    }

    async fn open_session(&self, requester: &str, responder: &str) {
        let displaced = self.inner.sessions.establish(requester, responder).await;
        info!(%requester, %responder, "Session established");

        for old in displaced {
            for (left, partner) in [
                (&old.participant_a, &old.participant_b),
                (&old.participant_b, &old.participant_a),
            ] {
                if partner != requester && partner != responder {
                    self.inner
                        .registry
                        .send_to(partner, ServerEvent::SessionEnded { peer: left.clone() })
                        .await;
                }
            }
        }
    }

    async fn take_pending(&self, requester: &str, responder: &str) -> bool {
        if !self.tracks_pending() {
            return false;
        }
        self.inner
            .pending
            .lock()
            .await
            .remove(&(requester.to_string(), responder.to_string()))
            .is_some()
    }

    fn schedule_expiry(&self, pair: (String, String), request_id: Uuid, timeout: Duration) {
        let negotiator = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            negotiator.expire(pair, request_id).await;
        });
    }

    async fn expire(&self, pair: (String, String), request_id: Uuid) {
        {
            let mut pending = self.inner.pending.lock().await;
            // Answered or superseded by a newer request
            if pending.get(&pair) != Some(&request_id) {
                return;
            }
            pending.remove(&pair);
        }

        let (sender, receiver) = pair;
        info!(%sender, %receiver, "Connection request expired");

        let event = ServerEvent::RequestExpired {
            sender: sender.clone(),
            receiver: receiver.clone(),
        };
        self.inner.registry.send_to(&sender, event.clone()).await;
        self.inner.registry.send_to(&receiver, event).await;
    }
}

/// Short digest of a key blob, safe to put in logs.
pub fn key_fingerprint(key_blob: &str) -> String {
    let digest = Sha256::digest(key_blob.as_bytes());
    hex::encode(&digest[..6])
}
