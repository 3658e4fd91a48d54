use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::info;

use parley_types::api::{Claims, ConnectedUsers, DisconnectRequest, StatusMessage, UserPresence, UserSummary};

use crate::auth::{AppState, blocking};
use crate::error::ApiError;

/// All registered users.
pub async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let users = blocking(&state, |state| {
        state
            .db
            .list_users()?
            .into_iter()
            .map(|row| row.into_model())
            .collect::<anyhow::Result<Vec<_>>>()
    })
    .await?;

    let summaries: Vec<UserSummary> = users
        .into_iter()
        .map(|u| UserSummary {
            id: u.id,
            username: u.username,
        })
        .collect();

    Ok(Json(summaries))
}

/// Registered users with the online flag set by login/logout.
pub async fn online_users(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let rows = blocking(&state, |state| state.db.list_users()).await?;

    let presence: Vec<UserPresence> = rows
        .into_iter()
        .map(|row| UserPresence {
            username: row.username,
            is_online: row.is_online,
        })
        .collect();

    Ok(Json(presence))
}

/// Users holding a live gateway connection right now.
pub async fn connected_users(State(state): State<AppState>) -> impl IntoResponse {
    let usernames = state.dispatcher.registry().usernames().await;
    Json(ConnectedUsers { usernames })
}

/// Leave the chat with `peer`. The peer is notified over the gateway if
/// connected.
pub async fn disconnect(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<DisconnectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.peer.is_empty() {
        return Err(ApiError::BadRequest("Peer is required"));
    }

    let outcome = state.dispatcher.end_session(&claims.username, &req.peer).await;
    info!(username = %claims.username, peer = %req.peer, ?outcome, "Chat disconnected");

    Ok(Json(StatusMessage {
        message: "Chat disconnected".into(),
    }))
}
