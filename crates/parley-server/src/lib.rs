pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::{HeaderValue, Method, header::{AUTHORIZATION, CONTENT_TYPE}},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use parley_api::auth::{self, AppState, AppStateInner};
use parley_api::middleware::require_auth;
use parley_api::users;
use parley_db::Database;
use parley_gateway::Dispatcher;
use parley_gateway::connection;

use crate::config::ServerConfig;

pub fn build_state(db: Database, config: &ServerConfig) -> anyhow::Result<AppState> {
    Ok(Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        token_ttl: config.token_ttl()?,
        dispatcher: Dispatcher::new(config.gateway.clone()),
    }))
}

pub fn build_app(state: AppState, cors_origin: Option<&str>) -> anyhow::Result<Router> {
    let public_routes = Router::new()
        .route("/api/users/register", post(auth::register))
        .route("/api/users/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/users", get(users::list_users))
        .route("/api/users/online", get(users::online_users))
        .route("/api/users/connected", get(users::connected_users))
        .route("/api/users/logout", post(auth::logout))
        .route("/api/users/disconnect", post(users::disconnect))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let cors = match cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(HeaderValue::from_str(origin)?))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(true),
        None => CorsLayer::permissive(),
    };

    Ok(Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        ))
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    ws.max_message_size(dispatcher.config().max_message_bytes)
        .on_upgrade(move |socket| connection::handle_connection(socket, dispatcher))
}
