use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use parley_gateway::GatewayConfig;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

/// Upper bound for `PARLEY_TOKEN_TTL_HOURS` (one year).
const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365;

/// Everything the server reads from the environment (or `.env`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    /// Exact origin allowed by CORS; permissive when unset.
    pub cors_origin: Option<String>,
    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            db_path: "parley.db".into(),
            jwt_secret: String::new(),
            token_ttl_hours: 1,
            cors_origin: None,
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let jwt_secret = std::env::var("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder");
        }

        let request_timeout = match std::env::var("PARLEY_REQUEST_TIMEOUT_SECS") {
            Ok(raw) if !raw.is_empty() => Some(Duration::from_secs(
                raw.parse()
                    .with_context(|| format!("PARLEY_REQUEST_TIMEOUT_SECS={raw}"))?,
            )),
            _ => None,
        };

        let verify_join = env_flag("PARLEY_VERIFY_JOIN")?;

        let gateway = GatewayConfig {
            outbound_capacity: env_or("PARLEY_OUTBOUND_QUEUE", defaults.gateway.outbound_capacity)?,
            max_message_bytes: env_or("PARLEY_MAX_MESSAGE_BYTES", defaults.gateway.max_message_bytes)?,
            request_timeout,
            enforce_sessions: env_flag("PARLEY_ENFORCE_SESSIONS")?,
            notify_undeliverable: env_flag("PARLEY_NOTIFY_UNDELIVERABLE")?,
            join_secret: verify_join.then(|| jwt_secret.clone()),
        };

        let config = Self {
            host: std::env::var("PARLEY_HOST").unwrap_or(defaults.host),
            port: env_or("PARLEY_PORT", defaults.port)?,
            db_path: std::env::var("PARLEY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            jwt_secret,
            token_ttl_hours: env_or("PARLEY_TOKEN_TTL_HOURS", defaults.token_ttl_hours)?,
            cors_origin: std::env::var("PARLEY_CORS_ORIGIN").ok().filter(|s| !s.is_empty()),
            gateway,
        };
        config.token_ttl()?;
        Ok(config)
    }

    /// Lifetime of issued JWTs. Fails unless it is between one hour and a year.
    pub fn token_ttl(&self) -> Result<chrono::Duration> {
        let hours = self.token_ttl_hours;
        if !(1..=MAX_TOKEN_TTL_HOURS).contains(&hours) {
            bail!("PARLEY_TOKEN_TTL_HOURS must be between 1 and {MAX_TOKEN_TTL_HOURS}, got {hours}");
        }
        chrono::Duration::try_hours(hours).context("PARLEY_TOKEN_TTL_HOURS out of range")
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{}={}: {}", key, raw, e)),
        _ => Ok(default),
    }
}

fn env_flag(key: &str) -> Result<bool> {
    match std::env::var(key) {
        Ok(raw) => parse_flag(&raw).with_context(|| format!("{key} must be a boolean")),
        Err(_) => Ok(false),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
