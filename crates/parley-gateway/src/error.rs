use parley_types::events::CommandKind;
use thiserror::Error;

/// Reasons a client command is rejected locally. These are logged and the
/// command is ignored; nothing is sent to other clients.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0:?} sent before join")]
    NotJoined(CommandKind),

    #[error("{kind:?} claims to be '{claimed}' but connection joined as '{joined}'")]
    IdentityMismatch {
        kind: CommandKind,
        claimed: String,
        joined: String,
    },

    #[error("empty username")]
    EmptyUsername,

    #[error("accepted response carries no key blob")]
    MissingKeyBlob,

    #[error("join requires a token")]
    MissingToken,

    #[error("join token rejected: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("join token belongs to '{token_user}', not '{username}'")]
    TokenMismatch { token_user: String, username: String },
}
