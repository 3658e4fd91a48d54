use std::sync::Arc;

use anyhow::anyhow;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use parley_db::Database;
use parley_gateway::Dispatcher;
use parley_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse, StatusMessage};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub dispatcher: Dispatcher,
}

/// Run blocking DB (or hashing) work off the async runtime.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppStateInner) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow!("blocking task failed"))
        })?
        .map_err(ApiError::from)
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_registration(&req.username, &req.password)?;

    let user_id = Uuid::new_v4();
    let username = req.username.clone();

    let created = blocking(&state, move |state| {
        // Check if username is taken
        if state.db.user_exists(&req.username)? {
            return Ok(false);
        }

        // Hash password with Argon2id
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| anyhow!("Password hashing failed: {}", e))?
            .to_string();

        // A concurrent registration may have taken the name since the check
        state
            .db
            .create_user(&user_id.to_string(), &req.username, &password_hash)
    })
    .await?;

    if !created {
        return Err(ApiError::UserExists);
    }

    let token = create_token(&state.jwt_secret, state.token_ttl, user_id, &username)?;
    info!(%username, "Registered user");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            token,
        }),
    ))
}

/// Lengths are counted in characters, not bytes.
fn validate_registration(username: &str, password: &str) -> Result<(), ApiError> {
    if !(3..=32).contains(&username.chars().count()) {
        return Err(ApiError::BadRequest("Username must be 3 to 32 characters"));
    }
    if password.chars().count() < 8 {
        return Err(ApiError::BadRequest("Password must be at least 8 characters"));
    }
    Ok(())
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let verified = blocking(&state, move |state| {
        let Some(user) = state.db.get_user_by_username(&req.username)? else {
            return Ok(None);
        };

        // Verify password
        let parsed_hash = PasswordHash::new(&user.password)
            .map_err(|e| anyhow!("Stored hash for '{}' is corrupt: {}", user.username, e))?;
        if Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .is_err()
        {
            return Ok(None);
        }

        state.db.set_online(&user.username, true)?;
        Ok(Some(user))
    })
    .await?
    .ok_or(ApiError::InvalidCredentials)?;

    let user_id: Uuid = verified
        .id
        .parse()
        .map_err(|e| anyhow!("Corrupt user id '{}': {}", verified.id, e))?;

    let token = create_token(&state.jwt_secret, state.token_ttl, user_id, &verified.username)?;
    info!(username = %verified.username, "Logged in");

    Ok(Json(LoginResponse {
        user_id,
        username: verified.username,
        token,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let username = claims.username.clone();
    let found = blocking(&state, move |state| state.db.set_online(&claims.username, false)).await?;
    if !found {
        return Err(ApiError::UserNotFound);
    }

    info!(%username, "Logged out");
    Ok(Json(StatusMessage {
        message: "Logout successful".into(),
    }))
}

pub fn create_token(
    secret: &str,
    ttl: chrono::Duration,
    user_id: Uuid,
    username: &str,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
