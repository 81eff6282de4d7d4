use std::{env, fmt::Display, net::SocketAddr, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{info, warn};

use crate::sse::DEFAULT_SUBSCRIBER_CAPACITY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_health_check: Duration,
    pub jwt_secret: String,
    pub live_channel_capacity: usize,
    pub sse_keepalive: Duration,
}

impl Config {
    /// Reads `.env` (if present) and then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            info!("no .env file loaded: {e}");
        }

        let database_url = optional("DATABASE_URL");
        if database_url.is_none() {
            warn!("DATABASE_URL not set, votes will only be kept in memory");
        }

        Ok(Self {
            bind_addr: try_load("BIND_ADDR", "0.0.0.0:8080")?,
            database_url,
            db_max_connections: positive(try_load("DB_MAX_CONNECTIONS", "20")?, "DB_MAX_CONNECTIONS")?,
            db_health_check: Duration::from_secs(positive(
                try_load("DB_HEALTH_CHECK_SECS", "60")?,
                "DB_HEALTH_CHECK_SECS",
            )?),
            jwt_secret: optional("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            live_channel_capacity: positive(
                try_load("LIVE_CHANNEL_CAPACITY", &DEFAULT_SUBSCRIBER_CAPACITY.to_string())?,
                "LIVE_CHANNEL_CAPACITY",
            )?,
            sse_keepalive: Duration::from_secs(positive(
                try_load("SSE_KEEPALIVE_SECS", "30")?,
                "SSE_KEEPALIVE_SECS",
            )?),
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let raw = optional(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    let parsed = raw.trim().parse::<T>();
    parsed.map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value: raw,
    })
}

fn positive<T: Default + PartialOrd + Display>(value: T, key: &'static str) -> Result<T, ConfigError> {
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        })
    }
}
