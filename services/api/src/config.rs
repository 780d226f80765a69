//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub metrics_bind_address: SocketAddr,
    pub database_url: String,
    pub database_max_connections: u32,
    pub log_level: Level,
    pub environment: String,
    pub worker_concurrency: usize,
    pub worker_shutdown_timeout: Duration,
    pub worker_poll_interval: Duration,
    pub cleanup_interval: Duration,
    pub stale_session_max_age_hours: i64,
    pub ai_config_cache_ttl: Duration,
    pub http_request_timeout: Duration,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_model: String,
    pub gemini_model: String,
    pub claude_model: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Server and Database ---
        let bind_address = parse_var("BIND_ADDRESS", "0.0.0.0:9000")?;
        let metrics_bind_address = parse_var("METRICS_BIND_ADDRESS", "0.0.0.0:9100")?;
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
        let database_max_connections = parse_var("DATABASE_MAX_CONNECTIONS", "25")?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;
        let environment =
            std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        // --- Worker ---
        let worker_concurrency: usize = parse_var("WORKER_CONCURRENCY", "10")?;
        if worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "WORKER_CONCURRENCY".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let worker_shutdown_timeout =
            Duration::from_secs(parse_var("WORKER_SHUTDOWN_TIMEOUT_SECS", "30")?);
        let worker_poll_interval =
            Duration::from_millis(parse_var("WORKER_POLL_INTERVAL_MS", "500")?);
        let cleanup_interval = Duration::from_secs(parse_var("CLEANUP_INTERVAL_SECS", "3600")?);
        let stale_session_max_age_hours = parse_var("STALE_SESSION_MAX_AGE_HOURS", "24")?;
        let ai_config_cache_ttl =
            Duration::from_secs(parse_var("AI_CONFIG_CACHE_TTL_SECS", "300")?);
        let http_request_timeout =
            Duration::from_secs(parse_var("HTTP_REQUEST_TIMEOUT_SECS", "30")?);

        // --- AI Providers (keys are optional; a provider exists only with its key) ---
        let openai_api_key = non_empty_var("OPENAI_API_KEY");
        let gemini_api_key = non_empty_var("GEMINI_API_KEY");
        let anthropic_api_key = non_empty_var("ANTHROPIC_API_KEY");
        let openai_model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let gemini_model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        let claude_model = std::env::var("CLAUDE_MODEL")
            .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());

        Ok(Self {
            bind_address,
            metrics_bind_address,
            database_url,
            database_max_connections,
            log_level,
            environment,
            worker_concurrency,
            worker_shutdown_timeout,
            worker_poll_interval,
            cleanup_interval,
            stale_session_max_age_hours,
            ai_config_cache_ttl,
            http_request_timeout,
            openai_api_key,
            gemini_api_key,
            anthropic_api_key,
            openai_model,
            gemini_model,
            claude_model,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Installs the global tracing subscriber: JSON lines in production, text elsewhere.
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));
    let registry = tracing_subscriber::registry().with(filter);
    if config.is_production() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_var_reports_the_variable() {
        let err = parse_var::<u32>("MINDHIT_TEST_UNSET_NUMBER", "abc").unwrap_err();
        match err {
            ConfigError::InvalidValue(name, _) => assert_eq!(name, "MINDHIT_TEST_UNSET_NUMBER"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(parse_var::<u64>("MINDHIT_TEST_UNSET_NUMBER", "7").unwrap(), 7);
    }

    #[test]
    fn blank_keys_count_as_missing() {
        assert_eq!(non_empty_var("MINDHIT_TEST_UNSET_KEY"), None);
    }
}
