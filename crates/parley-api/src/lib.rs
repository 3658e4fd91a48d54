pub mod auth;
pub mod error;
pub mod middleware;
pub mod users;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
