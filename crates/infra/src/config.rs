//! Environment-driven configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::outbox::OutboxOptions;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    Parse { key: String, details: String },
}

/// Configuration that can be loaded from environment variables.
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse `key` if set, `default` otherwise.
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => parse(key, &raw),
        Err(_) => Ok(default),
    }
}

/// Parse `key` if set and non-empty.
pub fn env_parse_optional<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse(key, &raw).map(Some),
        _ => Ok(None),
    }
}

/// Reject values below `min`, naming the variable they came from.
pub fn at_least<T>(key: &str, value: T, min: T) -> Result<T, ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min {
        return Err(ConfigError::Parse {
            key: key.to_string(),
            details: format!("must be at least {min}, got {value}"),
        });
    }
    Ok(value)
}

fn parse<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Parse {
        key: key.to_string(),
        details: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl FromEnv for DatabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_required("DATABASE_URL")?,
            max_connections: at_least(
                "DATABASE_MAX_CONNECTIONS",
                env_parse("DATABASE_MAX_CONNECTIONS", 10)?,
                1,
            )?,
            ..Self::new("")
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub redis_url: String,
    /// Prepended to every topic to form the stream key.
    pub stream_prefix: String,
}

impl FromEnv for BrokerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            redis_url: env_or_default("REDIS_URL", "redis://127.0.0.1:6379"),
            stream_prefix: env_or_default("REDIS_STREAM_PREFIX", ""),
        })
    }
}

impl FromEnv for OutboxOptions {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = OutboxOptions::default();
        Ok(Self {
            heartbeat: Duration::from_millis(env_parse(
                "OUTBOX_HEARTBEAT_MS",
                defaults.heartbeat.as_millis() as u64,
            )?),
            page_size: at_least(
                "OUTBOX_PAGE_SIZE",
                env_parse("OUTBOX_PAGE_SIZE", defaults.page_size)?,
                1,
            )?,
            lock_key: env_parse("OUTBOX_LOCK_KEY", defaults.lock_key)?,
            max_attempts: env_parse_optional("OUTBOX_MAX_ATTEMPTS")?
                .map(|max| at_least("OUTBOX_MAX_ATTEMPTS", max, 1))
                .transpose()?,
            publish_timeout: Duration::from_millis(env_parse(
                "OUTBOX_PUBLISH_TIMEOUT_MS",
                defaults.publish_timeout.as_millis() as u64,
            )?),
        })
    }
}

/// Everything the service binary needs at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub outbox: OutboxOptions,
    pub shutdown_grace: Duration,
}

impl FromEnv for AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::from_env()?,
            broker: BrokerConfig::from_env()?,
            outbox: OutboxOptions::from_env()?,
            shutdown_grace: Duration::from_secs(env_parse("SHUTDOWN_GRACE_SECS", 10)?),
        })
    }
}
