//! Service configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use sapwatch_core::{FetchOptions, HttpConfig, RetryConfig, SensorDevice, WindowParams};

use crate::sync::SyncSettings;

/// Longest backfill the service accepts, in days.
pub const MAX_BACKFILL_DAYS: u32 = 365;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Remote telemetry API connection.
    pub remote: RemoteConfig,
    /// Retry and chunking behavior.
    pub fetch: FetchConfig,
    /// Response cache.
    pub cache: CacheConfig,
    /// Sync engine.
    pub sync: SyncConfig,
    /// Sensor devices to keep in sync.
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    /// Load configuration from the default path, or defaults if absent.
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

    /// Validate the configuration, collecting every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use sapwatch_service::Config;
    ///
    /// let config = Config::default();
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.remote.validate());
        errors.extend(self.fetch.validate());
        errors.extend(self.cache.validate());
        errors.extend(self.sync.validate());

        let mut seen_codes = HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            let prefix = format!("devices[{}]", i);
            errors.extend(device.validate(&prefix));

            if !seen_codes.insert(device.code.to_lowercase()) {
                errors.push(ValidationError {
                    field: format!("{}.code", prefix),
                    message: format!("duplicate device code '{}'", device.code),
                });
            }
        }

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

    /// Connection settings for the HTTP telemetry client.
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            base_url: self.remote.base_url.clone(),
            app_key: self.remote.app_key.clone(),
            username: self.remote.username.clone(),
            password: self.remote.password.clone(),
            timeout: Duration::from_secs(self.remote.timeout_secs),
            window_params: self.remote.window_params,
        }
    }

    /// Retry and chunking options for the remote data client.
    pub fn fetch_options(&self) -> FetchOptions {
        let delay = Duration::from_secs(self.fetch.retry_delay_secs);
        FetchOptions {
            retry: RetryConfig::new(self.fetch.max_retries).base_delay(delay),
            chunk_threshold: time::Duration::days(i64::from(self.fetch.chunk_threshold_days)),
            chunk_size: time::Duration::days(i64::from(self.fetch.chunk_days)),
            chunk_retry: RetryConfig::new(self.fetch.chunk_retries).base_delay(delay),
        }
    }

    /// Configured devices as sensor devices.
    pub fn sensor_devices(&self) -> Vec<SensorDevice> {
        self.devices.iter().map(DeviceConfig::to_sensor_device).collect()
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        let Some((host, port)) = self.bind.rsplit_once(':') else {
            let message = if self.bind.is_empty() {
                "bind address cannot be empty".to_string()
            } else {
                format!("invalid bind address '{}': expected 'host:port'", self.bind)
            };
            errors.push(ValidationError::new("server.bind", message));
            return errors;
        };

        if host.is_empty() {
            errors.push(ValidationError::new("server.bind", "host cannot be empty"));
        }
        match port.parse::<u16>() {
            Ok(0) => errors.push(ValidationError::new("server.bind", "port cannot be 0")),
            Ok(_) => {}
            Err(_) => errors.push(ValidationError::new(
                "server.bind",
                format!("invalid port '{}': must be a number 1-65535", port),
            )),
        }

        errors
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: sapwatch_store::default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        if self.path.as_os_str().is_empty() {
            vec![ValidationError::new(
                "storage.path",
                "database path cannot be empty",
            )]
        } else {
            Vec::new()
        }
    }
}

/// Remote telemetry API connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Endpoint channel queries are sent to.
    pub base_url: String,
    /// Application key.
    pub app_key: String,
    /// Optional basic auth user.
    pub username: Option<String>,
    /// Optional basic auth password.
    pub password: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Parameter names carrying the window bounds.
    pub window_params: WindowParams,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9000/api/data".to_string(),
            app_key: String::new(),
            username: None,
            password: None,
            timeout_secs: 60,
            window_params: WindowParams::default(),
        }
    }
}

impl RemoteConfig {
    /// Validate remote configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            errors.push(ValidationError::new(
                "remote.base_url",
                format!("'{}' must start with http:// or https://", self.base_url),
            ));
        }
        if self.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "remote.timeout_secs",
                "timeout must be greater than 0",
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            errors.push(ValidationError::new(
                "remote.username",
                "password is set but username is missing",
            ));
        }

        errors
    }
}

/// Retry and chunking behavior for remote fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff unit in seconds; attempt `n` waits `n * retry_delay_secs`.
    pub retry_delay_secs: u64,
    /// Windows longer than this may be chunked.
    pub chunk_threshold_days: u32,
    /// Chunk length in days.
    pub chunk_days: u32,
    /// Retries per chunk before it is skipped.
    pub chunk_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_secs: 2,
            chunk_threshold_days: 365,
            chunk_days: 180,
            chunk_retries: 0,
        }
    }
}

impl FetchConfig {
    /// Validate fetch configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.chunk_days == 0 {
            errors.push(ValidationError::new(
                "fetch.chunk_days",
                "chunk length must be at least 1 day",
            ));
        } else if self.chunk_days > self.chunk_threshold_days {
            errors.push(ValidationError::new(
                "fetch.chunk_days",
                format!(
                    "chunk length {} exceeds the chunk threshold of {} days",
                    self.chunk_days, self.chunk_threshold_days
                ),
            ));
        }

        errors
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds between sweeps of expired entries.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    /// Validate cache configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        if self.sweep_interval_secs == 0 {
            vec![ValidationError::new(
                "cache.sweep_interval_secs",
                "sweep interval must be greater than 0",
            )]
        } else {
            Vec::new()
        }
    }
}

/// Sync engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between scheduled runs.
    pub interval_secs: u64,
    /// Run once as soon as the scheduler starts.
    pub run_on_startup: bool,
    /// Devices synced more recently than this are skipped.
    pub freshness_secs: u64,
    /// How far back the first sync of a device reaches.
    pub default_lookback_days: u32,
    /// Scheduled runs skip devices that ended longer ago than this.
    pub stale_device_days: u32,
    /// Readings written per transaction.
    pub batch_size: usize,
    /// Upper bound for backfill requests.
    pub max_backfill_days: u32,
    /// Facility the plants are filed under.
    pub facility: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            run_on_startup: true,
            freshness_secs: 300,
            default_lookback_days: 7,
            stale_device_days: 30,
            batch_size: 100,
            max_backfill_days: MAX_BACKFILL_DAYS,
            facility: "Greenhouse".to_string(),
        }
    }
}

impl SyncConfig {
    /// Validate sync configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.interval_secs == 0 {
            errors.push(ValidationError::new(
                "sync.interval_secs",
                "interval must be greater than 0",
            ));
        }
        if self.batch_size == 0 {
            errors.push(ValidationError::new(
                "sync.batch_size",
                "batch size must be greater than 0",
            ));
        }
        if self.default_lookback_days == 0 {
            errors.push(ValidationError::new(
                "sync.default_lookback_days",
                "lookback must be at least 1 day",
            ));
        }
        if self.max_backfill_days == 0 || self.max_backfill_days > MAX_BACKFILL_DAYS {
            errors.push(ValidationError::new(
                "sync.max_backfill_days",
                format!("must be between 1 and {}", MAX_BACKFILL_DAYS),
            ));
        }
        if self.facility.trim().is_empty() {
            errors.push(ValidationError::new(
                "sync.facility",
                "facility name cannot be empty",
            ));
        }

        errors
    }

    /// Engine settings derived from this section.
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            facility: self.facility.clone(),
            freshness: time::Duration::seconds(self.freshness_secs as i64),
            default_lookback: time::Duration::days(i64::from(self.default_lookback_days)),
            stale_after: time::Duration::days(i64::from(self.stale_device_days)),
            batch_size: self.batch_size.max(1),
            max_backfill_days: self.max_backfill_days.clamp(1, MAX_BACKFILL_DAYS),
        }
    }
}

/// A sensor device: one diameter and one sap flow channel on one plant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Short code readings are keyed by.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Remote setup id.
    pub setup_id: String,
    /// Remote channel id of the stem diameter stream.
    pub diameter_channel: u32,
    /// Remote channel id of the sap flow stream.
    pub sap_flow_channel: u32,
    /// First instant with meaningful data (RFC 3339).
    #[serde(with = "time::serde::rfc3339")]
    pub active_from: OffsetDateTime,
    /// Last instant with meaningful data, if the installation ended.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub active_until: Option<OffsetDateTime>,
}

impl DeviceConfig {
    /// Validate device configuration.
    pub fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.code.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("{}.code", prefix),
                "device code cannot be empty",
            ));
        }
        if self.setup_id.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("{}.setup_id", prefix),
                "setup id cannot be empty",
            ));
        }
        if self.diameter_channel == self.sap_flow_channel {
            errors.push(ValidationError::new(
                format!("{}.sap_flow_channel", prefix),
                format!(
                    "channel {} is used for both diameter and sap flow",
                    self.sap_flow_channel
                ),
            ));
        }
        if let Some(until) = self.active_until
            && until <= self.active_from
        {
            errors.push(ValidationError::new(
                format!("{}.active_until", prefix),
                "active_until must be after active_from",
            ));
        }

        errors
    }

    /// Convert into the shared device type.
    pub fn to_sensor_device(&self) -> SensorDevice {
        SensorDevice {
            code: self.code.clone(),
            name: if self.name.is_empty() {
                self.code.clone()
            } else {
                self.name.clone()
            },
            setup_id: self.setup_id.clone(),
            diameter_channel: self.diameter_channel,
            sap_flow_channel: self.sap_flow_channel,
            active_from: self.active_from,
            active_until: self.active_until,
        }
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
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `sync.batch_size` or `devices[0].code`).
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
        .join("sapwatch")
        .join("service.toml")
}
