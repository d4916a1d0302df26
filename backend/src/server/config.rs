//! Environment-driven application configuration.
//!
//! Parsing is tolerant where a safe default exists (invalid numbers fall
//! back with a logged warning) and strict where safety is at stake:
//! production refuses to start with dev auth enabled, without a database,
//! or without a real stream-ticket secret.

use std::env;
use std::time::Duration;

use tracing::warn;

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Test,
    Production,
}

impl AppEnv {
    fn from_env() -> Self {
        match env::var("APP_ENV").ok().as_deref() {
            Some("production") => Self::Production,
            Some("test") => Self::Test,
            Some("development") | None => Self::Development,
            Some(other) => {
                warn!(value = %other, "unrecognized APP_ENV; assuming development");
                Self::Development
            }
        }
    }

    /// Whether this is the production environment.
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Configuration errors that abort startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is required in production")]
    MissingInProduction { name: &'static str },
    #[error("{name} must be at least {min} characters")]
    TooShort { name: &'static str, min: usize },
    #[error("ALLOW_INSECURE_DEV_AUTH must be false in production")]
    InsecureProductionAuth,
}

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: AppEnv,
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub pg_pool_max_size: u32,
    pub pg_pool_min_idle: u32,
    pub identity_provider_url: Option<String>,
    pub identity_provider_secret_key: Option<String>,
    pub key_encryption_secret: Option<String>,
    pub allow_insecure_dev_auth: bool,
    pub auth_dev_user_id: Option<String>,
    pub sync_batch_limit: usize,
    pub sync_pull_limit: i64,
    pub stream_ticket_secret: String,
    pub stream_ticket_ttl: Duration,
    pub require_redis_for_ready: bool,
    pub tombstone_retention: Duration,
    pub note_changes_retention: Duration,
    pub maintenance_interval: Duration,
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" => true,
            "0" | "false" | "no" | "n" => false,
            other => {
                warn!(name, value = %other, "invalid boolean; using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_number<T>(name: &str, default: T, min: T, max: T) -> T
where
    T: std::str::FromStr + PartialOrd + Copy + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) if value >= min && value <= max => value,
            Ok(value) => {
                warn!(name, %value, %min, %max, "value out of range; using default");
                default
            }
            Err(_) => {
                warn!(name, value = %raw, "unparsable number; using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_duration_ms(name: &str, default: Duration) -> Duration {
    match env::var(name) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(ms) if ms > 0 => Duration::from_millis(ms),
            _ => {
                warn!(name, value = %raw, "invalid duration; using default");
                default
            }
        },
        Err(_) => default,
    }
}

impl AppConfig {
    /// Load and validate configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_env = AppEnv::from_env();

        let allow_insecure_dev_auth = env_bool("ALLOW_INSECURE_DEV_AUTH", false);
        if app_env.is_production() && allow_insecure_dev_auth {
            return Err(ConfigError::InsecureProductionAuth);
        }

        let database_url = env_string("DATABASE_URL");
        if app_env.is_production() && database_url.is_none() {
            return Err(ConfigError::MissingInProduction {
                name: "DATABASE_URL",
            });
        }

        let stream_ticket_secret = match env_string("STREAM_TICKET_SECRET") {
            Some(secret) => {
                if secret.len() < 16 {
                    return Err(ConfigError::TooShort {
                        name: "STREAM_TICKET_SECRET",
                        min: 16,
                    });
                }
                secret
            }
            None if app_env.is_production() => {
                return Err(ConfigError::MissingInProduction {
                    name: "STREAM_TICKET_SECRET",
                });
            }
            None => {
                warn!("STREAM_TICKET_SECRET not set; using an ephemeral secret (dev only)");
                uuid::Uuid::new_v4().to_string()
            }
        };

        let key_encryption_secret = env_string("KEY_ENCRYPTION_SECRET");
        if let Some(secret) = &key_encryption_secret {
            if secret.len() < 16 {
                return Err(ConfigError::TooShort {
                    name: "KEY_ENCRYPTION_SECRET",
                    min: 16,
                });
            }
        }

        Ok(Self {
            env: app_env,
            host: env_string("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: env_number("SERVER_PORT", 8080u16, 1, u16::MAX),
            database_url,
            redis_url: env_string("REDIS_URL"),
            pg_pool_max_size: env_number("PG_POOL_MAX_SIZE", 10u32, 1, 100),
            pg_pool_min_idle: env_number("PG_POOL_MIN_IDLE", 2u32, 0, 100),
            identity_provider_url: env_string("IDENTITY_PROVIDER_URL"),
            identity_provider_secret_key: env_string("IDENTITY_PROVIDER_SECRET_KEY"),
            key_encryption_secret,
            allow_insecure_dev_auth,
            auth_dev_user_id: env_string("AUTH_DEV_USER_ID"),
            sync_batch_limit: env_number("SYNC_BATCH_LIMIT", 100usize, 1, 500),
            sync_pull_limit: env_number("SYNC_PULL_LIMIT", 500i64, 1, 2_000),
            stream_ticket_secret,
            stream_ticket_ttl: Duration::from_secs(env_number(
                "STREAM_TICKET_TTL_SECONDS",
                60u64,
                5,
                600,
            )),
            require_redis_for_ready: env_bool("REQUIRE_REDIS_FOR_READY", false),
            tombstone_retention: env_duration_ms(
                "TOMBSTONE_RETENTION_MS",
                Duration::from_secs(30 * 24 * 3600),
            ),
            note_changes_retention: env_duration_ms(
                "NOTE_CHANGES_RETENTION_MS",
                Duration::from_secs(45 * 24 * 3600),
            ),
            maintenance_interval: env_duration_ms(
                "MAINTENANCE_INTERVAL_MS",
                Duration::from_secs(600),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    //! Config parsing is covered through the pure helpers; environment
    //! mutation in tests is process-global and therefore avoided.

    use super::*;

    #[test]
    fn app_env_defaults_to_development() {
        // APP_ENV is unset in the test environment.
        assert_eq!(AppEnv::from_env(), AppEnv::Development);
    }

    #[test]
    fn config_error_messages_name_the_variable() {
        assert!(ConfigError::MissingInProduction {
            name: "DATABASE_URL"
        }
        .to_string()
        .contains("DATABASE_URL"));
        assert!(ConfigError::TooShort {
            name: "STREAM_TICKET_SECRET",
            min: 16
        }
        .to_string()
        .contains("16"));
    }
}
