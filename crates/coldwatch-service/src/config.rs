//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use coldwatch_core::{DebouncePolicy, ProbeOptions, RetryConfig};
use coldwatch_types::Scheme;
use serde::{Deserialize, Serialize};

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Live polling settings.
    pub monitor: MonitorConfig,
    /// Background sweep settings.
    pub sweep: SweepConfig,
    /// Offline debouncing.
    pub debounce: DebounceConfig,
    /// Unit registry location.
    pub registry: RegistryConfig,
    /// Where notifications go.
    pub notifications: NotificationsConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it is absent.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every problem.
    ///
    /// # Example
    ///
    /// ```
    /// use coldwatch_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.monitor.validate());
        errors.extend(self.sweep.validate());
        errors.extend(self.debounce.validate());
        errors.extend(self.registry.validate());
        errors.extend(self.notifications.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Prober options derived from `[monitor]`.
    pub fn probe_options(&self) -> ProbeOptions {
        let retry = RetryConfig::for_probe()
            .initial_delay(Duration::from_millis(self.monitor.retry_delay_ms))
            .max_delay(Duration::from_millis(self.monitor.retry_delay_ms));
        ProbeOptions::default()
            .retry(retry)
            .scheme(self.monitor.scheme)
    }

    /// Debounce policy derived from `[debounce]`.
    pub fn debounce_policy(&self) -> DebouncePolicy {
        DebouncePolicy::default()
            .failure_threshold(self.debounce.failure_threshold)
            .recency_window(Duration::from_secs(self.debounce.recency_window_secs))
    }
}

/// How the service polls units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollMode {
    /// One poll loop per unit on the short interval.
    #[default]
    Live,
    /// All units together on the long sweep interval.
    Sweep,
}

/// Minimum live poll interval in seconds.
pub const MIN_POLL_INTERVAL: u64 = 5;
/// Maximum live poll interval in seconds (1 hour).
pub const MAX_POLL_INTERVAL: u64 = 3600;
/// Request timeout bounds in milliseconds.
pub const REQUEST_TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 100..=60_000;
/// Sweep interval bounds in seconds.
pub const SWEEP_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 60..=86_400;

/// Live polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between polls of one unit.
    pub poll_interval_secs: u64,
    /// Bound on a single request, in milliseconds.
    pub request_timeout_ms: u64,
    /// Pause before retrying a network failure, in milliseconds.
    pub retry_delay_ms: u64,
    /// URL scheme for unit APIs.
    pub scheme: Scheme,
    /// Polling mode for `run`.
    pub mode: PollMode,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            request_timeout_ms: 3000,
            retry_delay_ms: 250,
            scheme: Scheme::Https,
            mode: PollMode::Live,
        }
    }
}

impl MonitorConfig {
    /// Validate monitor configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.poll_interval_secs < MIN_POLL_INTERVAL {
            errors.push(ValidationError::new(
                "monitor.poll_interval_secs",
                format!(
                    "poll interval {} is too short (minimum {} seconds)",
                    self.poll_interval_secs, MIN_POLL_INTERVAL
                ),
            ));
        } else if self.poll_interval_secs > MAX_POLL_INTERVAL {
            errors.push(ValidationError::new(
                "monitor.poll_interval_secs",
                format!(
                    "poll interval {} is too long (maximum {} seconds / 1 hour)",
                    self.poll_interval_secs, MAX_POLL_INTERVAL
                ),
            ));
        }

        if !REQUEST_TIMEOUT_RANGE.contains(&self.request_timeout_ms) {
            errors.push(ValidationError::new(
                "monitor.request_timeout_ms",
                format!(
                    "request timeout {} must be between {} and {} ms",
                    self.request_timeout_ms,
                    REQUEST_TIMEOUT_RANGE.start(),
                    REQUEST_TIMEOUT_RANGE.end()
                ),
            ));
        }

        if self.retry_delay_ms > 10_000 {
            errors.push(ValidationError::new(
                "monitor.retry_delay_ms",
                format!("retry delay {} is too long (maximum 10000 ms)", self.retry_delay_ms),
            ));
        }

        errors
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Background sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Seconds between sweeps.
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { interval_secs: 900 }
    }
}

impl SweepConfig {
    /// Validate sweep configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !SWEEP_INTERVAL_RANGE.contains(&self.interval_secs) {
            errors.push(ValidationError::new(
                "sweep.interval_secs",
                format!(
                    "sweep interval {} must be between {} and {} seconds",
                    self.interval_secs,
                    SWEEP_INTERVAL_RANGE.start(),
                    SWEEP_INTERVAL_RANGE.end()
                ),
            ));
        }
        errors
    }

    /// Sweep interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Offline debouncing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Consecutive failures before a unit counts as offline.
    pub failure_threshold: u32,
    /// How recent the last success must be, in seconds, for an offline
    /// notification to be sent.
    pub recency_window_secs: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            recency_window_secs: 60,
        }
    }
}

impl DebounceConfig {
    /// Validate debounce configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.failure_threshold == 0 {
            errors.push(ValidationError::new(
                "debounce.failure_threshold",
                "failure threshold must be at least 1",
            ));
        }
        if self.recency_window_secs == 0 {
            errors.push(ValidationError::new(
                "debounce.recency_window_secs",
                "recency window must be at least 1 second",
            ));
        }
        errors
    }
}

/// Unit registry location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry file path.
    pub path: PathBuf,
    /// Seconds between registry re-reads while running.
    pub refresh_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
            refresh_secs: 30,
        }
    }
}

impl RegistryConfig {
    /// Validate registry configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "registry.path",
                "registry path cannot be empty",
            ));
        }
        if self.refresh_secs == 0 {
            errors.push(ValidationError::new(
                "registry.refresh_secs",
                "refresh interval must be at least 1 second",
            ));
        }
        errors
    }

    /// Refresh interval as a duration.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }
}

/// Notification targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Log notifications through tracing.
    pub log: bool,
    /// POST notifications as JSON to this URL.
    pub webhook_url: Option<String>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            log: true,
            webhook_url: None,
        }
    }
}

impl NotificationsConfig {
    /// Validate notification configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Some(url) = &self.webhook_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            errors.push(ValidationError::new(
                "notifications.webhook_url",
                format!("webhook URL '{}' must start with http:// or https://", url),
            ));
        }
        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `monitor.poll_interval_secs`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coldwatch")
        .join("coldwatch.toml")
}

/// Default unit registry path.
pub fn default_registry_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coldwatch")
        .join("units.json")
}
