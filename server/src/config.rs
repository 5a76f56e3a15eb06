//! Configuration management for the reservation server.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Only `DATABASE_URL` is required.

use std::str::FromStr;
use std::time::Duration;
use stockguard_runtime::{LeaseLockConfig, ReservationSettings};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed.
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
        /// Parse failure
        reason: String,
    },
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `PostgreSQL` configuration (stock ledger and order log)
    pub postgres: PostgresConfig,
    /// Redis connection URL (lock store)
    pub redis_url: String,
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Reservation lock timing
    pub lock: LockConfig,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    /// Connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Apply embedded migrations at startup
    pub run_migrations: bool,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Grace period for in-flight requests after a shutdown signal
    pub shutdown_timeout: Duration,
    /// Install the Prometheus recorder and serve `/metrics`
    pub metrics_enabled: bool,
}

/// Lock timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// How long a reservation waits for a busy item
    pub wait_timeout: Duration,
    /// Lease granted to each holder
    pub lease: Duration,
    /// Bound on a single release round-trip
    pub release_timeout: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`Config::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if `DATABASE_URL` is absent and
    /// [`ConfigError::Invalid`] if any value fails to parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        Ok(Self {
            postgres: PostgresConfig {
                url: env.required("DATABASE_URL")?,
                max_connections: env.parse("DATABASE_MAX_CONNECTIONS", 10)?,
                connect_timeout: Duration::from_secs(env.parse("DATABASE_CONNECT_TIMEOUT", 5)?),
                run_migrations: env.flag("RUN_MIGRATIONS", true)?,
            },
            redis_url: env
                .string("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            server: ServerConfig {
                host: env.string("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: env.parse("PORT", 8080)?,
                shutdown_timeout: Duration::from_secs(env.parse("SHUTDOWN_TIMEOUT", 30)?),
                metrics_enabled: env.flag("METRICS_ENABLED", true)?,
            },
            lock: LockConfig {
                wait_timeout: Duration::from_millis(env.parse("LOCK_WAIT_TIMEOUT_MS", 10_000)?),
                lease: Duration::from_millis(env.parse("LOCK_LEASE_MS", 25_000)?),
                release_timeout: Duration::from_millis(
                    env.parse("LOCK_RELEASE_TIMEOUT_MS", 2_000)?,
                ),
            },
        })
    }

    /// `host:port` to bind.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Coordinator settings derived from the lock timing.
    #[must_use]
    pub fn reservation_settings(&self) -> ReservationSettings {
        ReservationSettings {
            wait_timeout: self.lock.wait_timeout,
            lease_duration: self.lock.lease,
            ..ReservationSettings::default()
        }
    }

    /// Lease lock tuning derived from the lock timing.
    #[must_use]
    pub fn lease_lock_config(&self) -> LeaseLockConfig {
        LeaseLockConfig {
            release_timeout: self.lock.release_timeout,
            ..LeaseLockConfig::default()
        }
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.string(key).ok_or(ConfigError::Missing(key))
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(value) = self.string(key) else {
            return Ok(default);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value,
                reason: "expected a boolean".to_string(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/stockguard")]).unwrap();

        assert_eq!(config.postgres.max_connections, 10);
        assert_eq!(config.postgres.connect_timeout, Duration::from_secs(5));
        assert!(config.postgres.run_migrations);
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert!(config.server.metrics_enabled);
        assert_eq!(config.lock.wait_timeout, Duration::from_secs(10));
        assert_eq!(config.lock.lease, Duration::from_secs(25));
        assert_eq!(config.lock.release_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_database_url_required() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::Missing("DATABASE_URL"));
        assert_eq!(
            load(&[("DATABASE_URL", "  ")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/stock"),
            ("PORT", "9000"),
            ("LOCK_WAIT_TIMEOUT_MS", "250"),
            ("LOCK_LEASE_MS", "1000"),
            ("METRICS_ENABLED", "false"),
            ("RUN_MIGRATIONS", "0"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert!(!config.server.metrics_enabled);
        assert!(!config.postgres.run_migrations);

        let settings = config.reservation_settings();
        assert_eq!(settings.wait_timeout, Duration::from_millis(250));
        assert_eq!(settings.lease_duration, Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_values() {
        let err = load(&[("DATABASE_URL", "postgres://db"), ("PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));

        let err = load(&[("DATABASE_URL", "postgres://db"), ("METRICS_ENABLED", "maybe")])
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "METRICS_ENABLED",
                ..
            }
        ));
    }
}
