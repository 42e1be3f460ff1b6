//! Configuration for the HS110 exporter.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the target plug (hostname or IP).
pub const TARGET_ENV: &str = "TARGET_HS110";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Plug connection settings.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Poll loop settings.
    #[serde(default)]
    pub poller: PollerConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Plug connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Hostname or IP of the plug. Overridden by `TARGET_HS110`.
    #[serde(default)]
    pub target: String,

    /// TCP port of the plug's local protocol (default: 9999).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect and response timeout in milliseconds (default: 10000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_port() -> u16 {
    9999
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// What the poller does after a reading without energy metering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmeteredPolicy {
    /// Wait the backoff interval, as after a failure.
    #[default]
    Backoff,
    /// Poll again after the normal interval.
    Tight,
}

/// Poll loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Wait after a failed poll in seconds (default: 60).
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,

    /// Wait between successful polls in seconds (default: 0).
    #[serde(default)]
    pub poll_interval_secs: u64,

    /// Policy for readings without energy metering (default: "backoff").
    #[serde(default)]
    pub unmetered_policy: UnmeteredPolicy,
}

fn default_backoff_secs() -> u64 {
    60
}

impl PollerConfig {
    /// Backoff interval as a duration.
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            backoff_secs: default_backoff_secs(),
            poll_interval_secs: 0,
            unmetered_policy: UnmeteredPolicy::default(),
        }
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9498").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:9498".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Take the target from `TARGET_HS110` when it is set.
    ///
    /// An unset variable keeps the configured target, which may be empty. An
    /// empty target is not rejected here: polling it fails and is retried
    /// like any other unreachable device.
    pub fn apply_env(&mut self) {
        self.apply_target_override(std::env::var(TARGET_ENV).ok());
    }

    fn apply_target_override(&mut self, target: Option<String>) {
        if let Some(target) = target {
            self.device.target = target;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poller.backoff_secs == 0 {
            return Err(ConfigError::Validation(
                "backoff_secs must be > 0".to_string(),
            ));
        }

        if self.device.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be > 0".to_string(),
            ));
        }

        if self.device.port == 0 {
            return Err(ConfigError::Validation("port must be > 0".to_string()));
        }

        // Validate listen address format
        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        // Validate path starts with /
        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse("{}").unwrap();

        assert_eq!(config.device.target, "");
        assert_eq!(config.device.port, 9999);
        assert_eq!(config.device.timeout_ms, 10_000);
        assert_eq!(config.poller.backoff(), Duration::from_secs(60));
        assert_eq!(config.poller.poll_interval(), Duration::ZERO);
        assert_eq!(config.poller.unmetered_policy, UnmeteredPolicy::Backoff);
        assert_eq!(config.prometheus.listen, "0.0.0.0:9498");
        assert_eq!(config.prometheus.path, "/metrics");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            device: {
                target: "192.168.1.50",
                port: 9998,
                timeout_ms: 2500
            },
            poller: {
                backoff_secs: 30,
                poll_interval_secs: 15,
                unmetered_policy: "tight"
            },
            prometheus: {
                listen: "127.0.0.1:9100",
                path: "/plug/metrics"
            },
            logging: {
                level: "debug",
                format: "json"
            }
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.device.target, "192.168.1.50");
        assert_eq!(config.device.port, 9998);
        assert_eq!(config.device.timeout_ms, 2500);
        assert_eq!(config.poller.backoff_secs, 30);
        assert_eq!(config.poller.poll_interval_secs, 15);
        assert_eq!(config.poller.unmetered_policy, UnmeteredPolicy::Tight);
        assert_eq!(config.prometheus.listen, "127.0.0.1:9100");
        assert_eq!(config.prometheus.path, "/plug/metrics");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ device: {{ target: 'plug.lan' }} }}").unwrap();

        let config = ExporterConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.device.target, "plug.lan");
    }

    #[test]
    fn test_load_missing_file() {
        let result = ExporterConfig::load_from_file("/nonexistent/hs110.json5");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_target_override() {
        let mut config = ExporterConfig::parse("{ device: { target: 'old' } }").unwrap();

        config.apply_target_override(None);
        assert_eq!(config.device.target, "old");

        config.apply_target_override(Some("10.0.0.7".to_string()));
        assert_eq!(config.device.target, "10.0.0.7");
    }

    #[test]
    fn test_validate_invalid_listen() {
        let json = r#"{
            prometheus: { listen: "not-an-address" }
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let json = r#"{
            prometheus: { path: "no-leading-slash" }
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must start with /")
        );
    }

    #[test]
    fn test_validate_zero_backoff() {
        let result = ExporterConfig::parse("{ poller: { backoff_secs: 0 } }");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let result = ExporterConfig::parse("{ device: { timeout_ms: 0 } }");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validate_zero_port() {
        let result = ExporterConfig::parse("{ device: { port: 0 } }");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let result = ExporterConfig::parse(r#"{ poller: { unmetered_policy: "sometimes" } }"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
