//! Environment configuration

use log::info;
use std::env;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://messaging.db?mode=rwc";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_REALTIME_CAPACITY: usize = 64;
pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Debug, Error)]
#[error("invalid value {value:?} for {key}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_address: String,
    /// Buffered invalidations per realtime scope before a subscriber lags.
    pub realtime_channel_capacity: usize,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_owned(),
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            bind_address: DEFAULT_BIND_ADDRESS.to_owned(),
            realtime_channel_capacity: DEFAULT_REALTIME_CAPACITY,
            cors_allowed_origins: split_origins(DEFAULT_ALLOWED_ORIGINS),
        }
    }
}

impl AppConfig {
    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<AppConfig, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            info!("loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();

        Ok(AppConfig {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            database_max_connections: parse_or(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            bind_address: lookup("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            realtime_channel_capacity: parse_or(
                &lookup,
                "REALTIME_CHANNEL_CAPACITY",
                defaults.realtime_channel_capacity,
            )?,
            cors_allowed_origins: lookup("CORS_ALLOWED_ORIGINS")
                .map(|origins| split_origins(&origins))
                .unwrap_or(defaults.cors_allowed_origins),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError { key, value }),
    }
}

fn split_origins(origins: &str) -> Vec<String> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_owned)
        .collect()
}
