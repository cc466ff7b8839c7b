//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;

/// Bridge server configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Port for the control API and the worker WebSocket endpoint.
    pub port: u16,
    /// Port for the Prometheus metrics endpoint.
    pub metrics_port: u16,
    /// Path of the libSQL file backing the durable queue.
    pub db_path: PathBuf,
    /// Base URL of the central server to notify (None disables notifications).
    pub central_server_url: Option<String>,
    /// Workers silent for longer than this are evicted.
    pub heartbeat_timeout: Duration,
    /// How often the liveness monitor sweeps.
    pub sweep_interval: Duration,
    /// How long completed/failed tasks stay queryable.
    pub task_retention: Duration,
    /// How many times an explicitly failed task is re-queued before it is
    /// marked failed for good.
    pub max_task_retries: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            metrics_port: 9090,
            db_path: PathBuf::from("./data/bridge-queue.db"),
            central_server_url: None,
            heartbeat_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            task_retention: Duration::from_secs(300), // 5 minutes
            max_task_retries: 0,
        }
    }
}

impl BridgeConfig {
    /// Build the configuration from `BRIDGE_*` environment variables.
    ///
    /// Unparseable numbers fall back to the default with a warning. A zero
    /// timeout or sweep interval is rejected.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = env_parse("BRIDGE_PORT", defaults.port);
        let metrics_port = env_parse("BRIDGE_METRICS_PORT", defaults.metrics_port);

        let db_path = std::env::var("BRIDGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let central_server_url = std::env::var("CENTRAL_SERVER_URL")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());

        let heartbeat_timeout = Duration::from_secs(env_parse(
            "BRIDGE_HEARTBEAT_TIMEOUT_SECS",
            defaults.heartbeat_timeout.as_secs(),
        ));
        let sweep_interval = Duration::from_secs(env_parse(
            "BRIDGE_SWEEP_INTERVAL_SECS",
            defaults.sweep_interval.as_secs(),
        ));
        let task_retention = Duration::from_secs(env_parse(
            "BRIDGE_TASK_RETENTION_SECS",
            defaults.task_retention.as_secs(),
        ));
        let max_task_retries = env_parse("BRIDGE_MAX_TASK_RETRIES", defaults.max_task_retries);

        let config = Self {
            port,
            metrics_port,
            db_path,
            central_server_url,
            heartbeat_timeout,
            sweep_interval,
            task_retention,
            max_task_retries,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the monitor cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "BRIDGE_HEARTBEAT_TIMEOUT_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "BRIDGE_SWEEP_INTERVAL_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

/// `BRIDGE_LOG_DIR`. Read on its own because logging is set up before the
/// rest of the configuration is parsed.
pub fn log_dir_from_env() -> Option<PathBuf> {
    std::env::var("BRIDGE_LOG_DIR")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr + std::fmt::Display + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "Unparseable config value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_timings() {
        let config = BridgeConfig::default();
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.task_retention, Duration::from_secs(300));
        assert_eq!(config.max_task_retries, 0);
        assert!(config.central_server_url.is_none());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = BridgeConfig {
            heartbeat_timeout: Duration::ZERO,
            ..BridgeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        let config = BridgeConfig {
            sweep_interval: Duration::ZERO,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
