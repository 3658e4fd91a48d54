use serde::{Deserialize, Serialize};

/// Events sent FROM server TO client over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Server confirms the `join` for this connection
    Ready { username: String },

    /// A peer asked to open a session, carrying its key blob
    RequestReceived { sender: String, key_blob: String },

    /// The peer we asked accepted; `receiver` is the responder
    RequestAccepted { receiver: String, key_blob: String },

    /// The peer we asked declined
    RequestRejected { receiver: String },

    /// Relayed ciphertext from a peer
    MessageReceived { sender: String, text: String },

    /// A pending request ran out of time without an answer
    RequestExpired { sender: String, receiver: String },

    /// The session with `peer` is over
    SessionEnded { peer: String },

    /// Something this connection sent could not be delivered
    DeliveryFailed {
        receiver: String,
        event: CommandKind,
        reason: DropReason,
    },
}

/// Commands sent FROM client TO server over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    /// Bind this connection to a username
    Join {
        username: String,
        #[serde(default)]
        token: Option<String>,
    },

    /// Ask `receiver` to open a session
    SubmitRequest {
        sender: String,
        receiver: String,
        key_blob: String,
    },

    /// Answer a request. `sender` is the original requester, `receiver` is
    /// the one answering.
    SubmitResponse {
        sender: String,
        receiver: String,
        accepted: bool,
        #[serde(default)]
        key_blob: Option<String>,
    },

    /// Relay opaque ciphertext to `receiver`
    SendMessage {
        sender: String,
        receiver: String,
        text: String,
    },

    /// Leave the session with `peer`
    EndSession { sender: String, peer: String },
}

impl ClientCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Join { .. } => CommandKind::Join,
            Self::SubmitRequest { .. } => CommandKind::SubmitRequest,
            Self::SubmitResponse { .. } => CommandKind::SubmitResponse,
            Self::SendMessage { .. } => CommandKind::SendMessage,
            Self::EndSession { .. } => CommandKind::EndSession,
        }
    }
}

/// Discriminant of a [`ClientCommand`], used when reporting failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandKind {
    Join,
    SubmitRequest,
    SubmitResponse,
    SendMessage,
    EndSession,
}

/// Why an event was not handed to its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DropReason {
    /// Nobody is joined under that username
    NotRegistered,
    /// The destination's outbound queue is full
    QueueFull,
    /// The destination connection is shutting down
    Closed,
    /// Strict sessions are on and the two users are not paired
    NotPaired,
    /// Strict sessions are on and no matching request is pending
    NoPendingRequest,
    /// An accepting response carried no key blob, so it was not forwarded
    MissingKeyBlob,
}
