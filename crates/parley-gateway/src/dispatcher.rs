use std::sync::Arc;

use jsonwebtoken::{DecodingKey, Validation, decode};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use parley_types::api::Claims;
use parley_types::events::{ClientCommand, CommandKind, DropReason, ServerEvent};

use crate::config::GatewayConfig;
use crate::error::CommandError;
use crate::negotiator::{Answer, Negotiator};
use crate::registry::{Delivery, Handle, Registry};
use crate::router::RelayRouter;
use crate::sessions::SessionTable;

/// Per-connection state, owned by that connection's reader task.
#[derive(Debug)]
pub struct Connection {
    handle: Handle,
    username: Option<String>,
}

impl Connection {
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn conn_id(&self) -> Uuid {
        self.handle.conn_id()
    }

    /// The name this connection last joined as.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }
}

/// Owns the connection registry and routes client commands to the
/// negotiator or the relay router.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    config: GatewayConfig,
    registry: Registry,
    negotiator: Negotiator,
    router: RelayRouter,
}

impl Dispatcher {
    pub fn new(config: GatewayConfig) -> Self {
        let registry = Registry::new();
        let sessions = SessionTable::new();
        let negotiator = Negotiator::new(registry.clone(), sessions.clone(), &config);
        let router = RelayRouter::new(registry.clone(), sessions, config.enforce_sessions);

        Self {
            inner: Arc::new(DispatcherInner {
                config,
                registry,
                negotiator,
                router,
            }),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Read access for presence listings.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// A transport connected: allocate its handle. It is not reachable by
    /// username until it joins.
    pub fn open(&self) -> (Connection, mpsc::Receiver<ServerEvent>) {
        let (handle, rx) = Handle::channel(self.inner.config.outbound_capacity);
        (
            Connection {
                handle,
                username: None,
            },
            rx,
        )
    }

    /// The transport closed. Any unanswered request involving this user is
    /// left as is.
    pub async fn close(&self, handle: &Handle) {
        match self.inner.registry.remove(handle).await {
            Some(username) => info!(%username, conn_id = %handle.conn_id(), "Left gateway"),
            None => debug!(conn_id = %handle.conn_id(), "Closed connection held no registration"),
        }
    }

    pub async fn handle_command(&self, conn: &mut Connection, cmd: ClientCommand) -> Result<(), CommandError> {
        let kind = cmd.kind();
        match cmd {
            ClientCommand::Join { username, token } => self.join(conn, username, token).await,

            ClientCommand::SubmitRequest {
                sender,
                receiver,
                key_blob,
            } => {
                bind_identity(conn, &sender, kind)?;
                let outcome = self
                    .inner
                    .negotiator
                    .submit_request(&sender, &receiver, key_blob)
                    .await;
                self.acknowledge(conn, receiver, kind, outcome);
                Ok(())
            }

            // Here `receiver` is the one answering and `sender` the original requester
            ClientCommand::SubmitResponse {
                sender,
                receiver,
                accepted,
                key_blob,
            } => {
                bind_identity(conn, &receiver, kind)?;
                let answer = match (accepted, key_blob) {
                    (true, Some(key_blob)) => Answer::Accept { key_blob },
                    (true, None) => {
                        // Tell the responder so it can answer again
                        conn.handle.deliver(ServerEvent::DeliveryFailed {
                            receiver: sender,
                            event: kind,
                            reason: DropReason::MissingKeyBlob,
                        });
                        return Err(CommandError::MissingKeyBlob);
                    }
                    (false, _) => Answer::Reject,
                };
                let outcome = self
                    .inner
                    .negotiator
                    .submit_response(&sender, &receiver, answer)
                    .await;
                self.acknowledge(conn, sender, kind, outcome);
                Ok(())
            }

            ClientCommand::SendMessage {
                sender,
                receiver,
                text,
            } => {
                bind_identity(conn, &sender, kind)?;
                let outcome = self.inner.router.relay(&sender, &receiver, text).await;
                self.acknowledge(conn, receiver, kind, outcome);
                Ok(())
            }

            ClientCommand::EndSession { sender, peer } => {
                bind_identity(conn, &sender, kind)?;
                let outcome = self.inner.negotiator.end_session(&sender, &peer).await;
                self.acknowledge(conn, peer, kind, outcome);
                Ok(())
            }
        }
    }

    /// End `username`'s chat with `peer` on behalf of the REST surface.
    pub async fn end_session(&self, username: &str, peer: &str) -> Delivery {
        self.inner.negotiator.end_session(username, peer).await
    }

    async fn join(&self, conn: &mut Connection, username: String, token: Option<String>) -> Result<(), CommandError> {
        if username.is_empty() {
            return Err(CommandError::EmptyUsername);
        }
        if let Some(secret) = &self.inner.config.join_secret {
            verify_join_token(secret, token.as_deref(), &username)?;
        }

        let registry = &self.inner.registry;

        // Re-join under a new name releases the old one
        if conn.username.as_deref().is_some_and(|previous| previous != username) {
            registry.remove(&conn.handle).await;
        }

        if let Some(replaced) = registry.register(&username, conn.handle.clone()).await {
            if replaced != conn.handle {
                info!(%username, stale = %replaced.conn_id(), "Join replaced an older connection");
            }
        }

        info!(%username, conn_id = %conn.conn_id(), "Joined gateway");
        conn.handle.deliver(ServerEvent::Ready {
            username: username.clone(),
        });
        conn.username = Some(username);
        Ok(())
    }

    /// Report a dropped delivery back to the sender, when enabled.
    fn acknowledge(&self, conn: &Connection, receiver: String, event: CommandKind, outcome: Delivery) {
        if !self.inner.config.notify_undeliverable {
            return;
        }
        if let Delivery::Dropped(reason) = outcome {
            conn.handle.deliver(ServerEvent::DeliveryFailed {
                receiver,
                event,
                reason,
            });
        }
    }
}

/// The identity a command claims must be the one this connection joined as.
fn bind_identity(conn: &Connection, claimed: &str, kind: CommandKind) -> Result<(), CommandError> {
    match conn.username.as_deref() {
        None => Err(CommandError::NotJoined(kind)),
        Some(joined) if joined != claimed => Err(CommandError::IdentityMismatch {
            kind,
            claimed: claimed.to_string(),
            joined: joined.to_string(),
        }),
        Some(_) => Ok(()),
    }
}

fn verify_join_token(secret: &str, token: Option<&str>, username: &str) -> Result<(), CommandError> {
    let token = token.ok_or(CommandError::MissingToken)?;
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    if token_data.claims.username != username {
        return Err(CommandError::TokenMismatch {
            token_user: token_data.claims.username,
            username: username.to_string(),
        });
    }
    Ok(())
}
