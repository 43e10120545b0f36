//! Application configuration loaded from environment variables.
//!
//! Loading is fail-fast: a missing or malformed variable stops startup with
//! a message naming it.

use std::env;

use herald_events::{EventError, KafkaConfig, PipelineConfig};
use thiserror::Error;

/// Default log filter when neither `RUST_LOG` nor `LOG_FILTER` is set.
pub const DEFAULT_LOG_FILTER: &str = "info,herald=debug";

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Configuration errors that can occur during environment loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },

    #[error(transparent)]
    Events(#[from] EventError),
}

/// Everything the notifier needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub notification_endpoint_url: String,
    pub log_filter: String,
    pub kafka: KafkaConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = required(&lookup, "DATABASE_URL")?;

        let database_max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "DATABASE_MAX_CONNECTIONS".to_string(),
                        message: format!("expected a positive integer, got {raw:?}"),
                    })
                }
            },
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let notification_endpoint_url = required(&lookup, "NOTIFICATION_ENDPOINT_URL")?;
        if !(notification_endpoint_url.starts_with("http://")
            || notification_endpoint_url.starts_with("https://"))
        {
            return Err(ConfigError::InvalidValue {
                var: "NOTIFICATION_ENDPOINT_URL".to_string(),
                message: "must be an http or https URL".to_string(),
            });
        }

        let log_filter = lookup("LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            database_url,
            database_max_connections,
            notification_endpoint_url,
            log_filter,
            kafka: KafkaConfig::from_lookup(&lookup)?,
            pipeline: PipelineConfig::from_lookup(&lookup)?,
        })
    }
}

fn required<F>(lookup: &F, var: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVar(var.to_string()))
}
