//! Client configuration management.
//!
//! Handles loading, saving, and accessing the stream client configuration:
//! backend address, endpoint candidate inputs, reconnect and probe timing,
//! history size and logging. Configuration is persisted as TOML on disk and
//! can be overridden from the environment.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants;
use crate::error::{ParkError, ParkResult};
use crate::platform;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backend address and endpoint discovery inputs.
    #[serde(default)]
    pub server: ServerConfig,

    /// Automatic reconnection settings.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Endpoint probe settings.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Record history settings.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend address and the inputs used to build endpoint candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Backend base URL, e.g. "http://parking.example.com:8675", or a
    /// relative proxy path such as "/api".
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Explicit "host:port" of the WebSocket service, overriding derivation.
    #[serde(default)]
    pub websocket_host: Option<String>,

    /// Host the client is being served from, if known.
    #[serde(default)]
    pub page_host: Option<String>,

    /// Fall back to the machine hostname when `page_host` is unset.
    #[serde(default = "default_true")]
    pub detect_page_host: bool,

    /// Port of the vehicle event service.
    #[serde(default = "default_service_port")]
    pub service_port: u16,

    /// Second port tried on the current host.
    #[serde(default = "default_alternate_port")]
    pub alternate_port: Option<u16>,

    /// Path of the WebSocket endpoint.
    #[serde(default = "default_service_path")]
    pub service_path: String,

    /// Loopback hosts tried last, on `service_port`.
    #[serde(default = "default_fallback_hosts")]
    pub fallback_hosts: Vec<String>,
}

/// Reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Base interval of the linear backoff in milliseconds.
    #[serde(default = "default_reconnect_interval")]
    pub base_interval_ms: u64,

    /// Maximum number of automatic reconnect attempts.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Endpoint probe configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Time budget of each probe in milliseconds.
    #[serde(default = "default_probe_timeout")]
    pub timeout_ms: u64,
}

/// Record history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of records kept in memory.
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses the default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output in the log file.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_base_url() -> String {
    constants::DEFAULT_BACKEND_URL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_service_port() -> u16 {
    constants::SERVICE_PORT
}

fn default_alternate_port() -> Option<u16> {
    Some(constants::ALTERNATE_PORT)
}

fn default_service_path() -> String {
    constants::SERVICE_PATH.to_string()
}

fn default_fallback_hosts() -> Vec<String> {
    constants::LOCAL_FALLBACK_HOSTS
        .iter()
        .map(|h| h.to_string())
        .collect()
}

fn default_reconnect_interval() -> u64 {
    constants::DEFAULT_RECONNECT_INTERVAL_MS
}

fn default_max_attempts() -> u32 {
    constants::DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_probe_timeout() -> u64 {
    constants::DEFAULT_PROBE_TIMEOUT_MS
}

fn default_history_capacity() -> usize {
    constants::DEFAULT_HISTORY_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            websocket_host: None,
            page_host: None,
            detect_page_host: true,
            service_port: default_service_port(),
            alternate_port: default_alternate_port(),
            service_path: default_service_path(),
            fallback_hosts: default_fallback_hosts(),
        }
    }
}

impl ServerConfig {
    /// Host used for "current host" candidates: the configured page host,
    /// else the machine hostname when detection is enabled.
    pub fn effective_page_host(&self) -> Option<String> {
        match &self.page_host {
            Some(host) if !host.trim().is_empty() => Some(host.trim().to_string()),
            _ if self.detect_page_host => platform::hostname(),
            _ => None,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: default_reconnect_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    /// Base interval as a Duration.
    pub fn base_interval(&self) -> Duration {
        Duration::from_millis(self.base_interval_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_probe_timeout(),
        }
    }
}

impl ProbeConfig {
    /// Probe timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default config file path, falling back
    /// to defaults when no file exists. Environment overrides are applied.
    pub fn load_default() -> ParkResult<Self> {
        let path = Self::default_config_path()?;
        let mut config = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> ParkResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> ParkResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ParkError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> ParkResult<PathBuf> {
        Ok(platform::config_dir()?.join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> ParkResult<PathBuf> {
        if self.logging.directory.is_empty() {
            Ok(platform::data_dir()?.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(constants::env::BACKEND_URL) {
            self.server.base_url = Self::sanitize_base_url(&url);
        }
        if let Some(host) = non_empty(constants::env::WEBSOCKET_HOST) {
            self.server.websocket_host = Some(host.trim().to_string());
        }
        if let Some(level) = non_empty(constants::env::LOG_LEVEL) {
            self.logging.level = level.trim().to_string();
        }
    }

    /// Reject values the client cannot run with.
    pub fn validate(&self) -> ParkResult<()> {
        if self.server.base_url.trim().is_empty() {
            return Err(ParkError::MissingConfig("server.base_url".into()));
        }
        if self.history.capacity == 0 {
            return Err(ParkError::Config("history.capacity must be at least 1".into()));
        }
        if self.probe.timeout_ms == 0 {
            return Err(ParkError::Config("probe.timeout_ms must be at least 1".into()));
        }
        Ok(())
    }

    /// Sanitize and normalize a backend address.
    ///
    /// Strips quotes, whitespace and trailing slashes. Relative proxy paths
    /// are kept as-is; bare hosts get an `http://` scheme.
    pub fn sanitize_base_url(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.starts_with('/') || trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };

        let normalized = with_scheme.trim_end_matches('/');
        if normalized.is_empty() {
            "/".to_string()
        } else {
            normalized.to_string()
        }
    }
}

/// Thread-safe configuration holder for shared access.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Clone the current configuration out of the handle.
    pub async fn snapshot(&self) -> AppConfig {
        self.inner.read().await.clone()
    }

    /// Save the current configuration to the given path.
    pub async fn save_to(&self, path: &Path) -> ParkResult<()> {
        let config = self.inner.read().await;
        config.save_to_file(path)
    }
}
