//! # Pipeline Configuration
//!
//! Configuration for the terminal's sale pipeline services.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TILL_TERMINAL_ID=till-1                                            │
//! │     TILL_BACKEND_URL=https://pos.example.com/api/                      │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/pos/till.toml (Linux)                                    │
//! │     ~/Library/Application Support/com.till.pos/till.toml (macOS)       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     auto-generated terminal id, localhost backend                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # till.toml
//! [terminal]
//! id = "till-1"
//! name = "Register 1"
//!
//! [backend]
//! base_url = "https://pos.example.com/api/"
//! timeout_secs = 10
//!
//! [sync]
//! max_retries = 5
//! batch_size = 50
//! interval_secs = 30
//! initial_backoff_ms = 1000
//! max_backoff_secs = 300
//! retention_days = 7
//!
//! [connectivity]
//! probe_interval_secs = 15
//! debounce_ms = 2000
//! degraded_latency_ms = 800
//!
//! [validation]
//! debounce_ms = 300
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Terminal Configuration
// =============================================================================

/// Identity of this terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Terminal identifier sent with every sale.
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable terminal name (e.g., "Register 1").
    #[serde(default = "default_terminal_name")]
    pub name: String,
}

fn default_terminal_name() -> String {
    "POS Terminal".to_string()
}

impl Default for TerminalConfig {
    fn default() -> Self {
        TerminalConfig {
            id: Uuid::new_v4().to_string(),
            name: default_terminal_name(),
        }
    }
}

// =============================================================================
// Backend Configuration
// =============================================================================

/// Where the stock and sale services live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL; endpoint paths are joined onto it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080/api/".to_string()
}

fn default_timeout() -> u64 {
    10
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync queue drain behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Attempts per operation before it is exhausted.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,

    /// Operations fetched per drain pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// Periodic drain interval while online.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Delay before the first retry of a failed operation.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound on the retry delay.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Synced offline records older than this are purged.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_max_retries() -> i64 {
    till_core::DEFAULT_MAX_RETRIES
}
fn default_batch_size() -> i64 {
    50
}
fn default_interval() -> u64 {
    30
}
fn default_initial_backoff() -> u64 {
    1000
}
fn default_max_backoff() -> u64 {
    300
}
fn default_retention_days() -> i64 {
    7
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            interval_secs: default_interval(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            retention_days: default_retention_days(),
        }
    }
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

// =============================================================================
// Connectivity Settings
// =============================================================================

/// Health probing and transition debouncing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivitySettings {
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// How long a new state must hold before a transition is announced.
    #[serde(default = "default_connectivity_debounce")]
    pub debounce_ms: u64,

    /// Probe latency above which the link is reported as degraded.
    #[serde(default = "default_degraded_latency")]
    pub degraded_latency_ms: u64,
}

fn default_probe_interval() -> u64 {
    15
}
fn default_connectivity_debounce() -> u64 {
    2000
}
fn default_degraded_latency() -> u64 {
    800
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        ConnectivitySettings {
            probe_interval_secs: default_probe_interval(),
            debounce_ms: default_connectivity_debounce(),
            degraded_latency_ms: default_degraded_latency(),
        }
    }
}

impl ConnectivitySettings {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn degraded_latency(&self) -> Duration {
        Duration::from_millis(self.degraded_latency_ms)
    }
}

// =============================================================================
// Validation Settings
// =============================================================================

/// Stock validation debouncing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSettings {
    /// Quiet period after a cart edit before stock is checked.
    #[serde(default = "default_validation_debounce")]
    pub debounce_ms: u64,
}

fn default_validation_debounce() -> u64 {
    300
}

impl Default for ValidationSettings {
    fn default() -> Self {
        ValidationSettings {
            debounce_ms: default_validation_debounce(),
        }
    }
}

impl ValidationSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

// =============================================================================
// Main Pipeline Configuration
// =============================================================================

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub terminal: TerminalConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub connectivity: ConnectivitySettings,

    #[serde(default)]
    pub validation: ValidationSettings,
}

impl PipelineConfig {
    /// Creates a new config with defaults and a generated terminal ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (till.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading pipeline config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Pipeline config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.terminal.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("terminal id is required".into()));
        }

        self.backend_url()?;

        if self.sync.max_retries <= 0 {
            return Err(SyncError::InvalidConfig(
                "max_retries must be greater than 0".into(),
            ));
        }

        if self.sync.batch_size <= 0 {
            return Err(SyncError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }

        if self.sync.retention_days < 0 {
            return Err(SyncError::InvalidConfig(
                "retention_days must not be negative".into(),
            ));
        }

        Ok(())
    }

    /// Parsed backend base URL.
    ///
    /// A missing trailing slash is added so endpoint paths are joined below
    /// the base instead of replacing its last segment.
    pub fn backend_url(&self) -> SyncResult<Url> {
        let mut raw = self.backend.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }

        let url = Url::parse(&raw)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "Backend URL must start with http:// or https://, got: {}",
                self.backend.base_url
            )));
        }
        Ok(url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("TILL_TERMINAL_ID") {
            debug!(terminal_id = %id, "Overriding terminal ID from environment");
            self.terminal.id = id;
        }

        if let Ok(name) = std::env::var("TILL_TERMINAL_NAME") {
            self.terminal.name = name;
        }

        if let Ok(url) = std::env::var("TILL_BACKEND_URL") {
            debug!(url = %url, "Overriding backend URL from environment");
            self.backend.base_url = url;
        }

        if let Ok(retries) = std::env::var("TILL_SYNC_MAX_RETRIES") {
            match retries.parse::<i64>() {
                Ok(n) => self.sync.max_retries = n,
                Err(_) => warn!(value = %retries, "Ignoring invalid TILL_SYNC_MAX_RETRIES"),
            }
        }

        if let Ok(interval) = std::env::var("TILL_SYNC_INTERVAL_SECS") {
            match interval.parse::<u64>() {
                Ok(n) => self.sync.interval_secs = n,
                Err(_) => warn!(value = %interval, "Ignoring invalid TILL_SYNC_INTERVAL_SECS"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "till", "pos")
            .map(|dirs| dirs.config_dir().join("till.toml"))
    }

    /// Returns the default database path, next to the config file.
    pub fn default_database_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "till", "pos")
            .map(|dirs| dirs.data_dir().join("till.db"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn terminal_id(&self) -> &str {
        &self.terminal.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(!config.terminal.id.is_empty()); // Auto-generated
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.batch_size, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = PipelineConfig::default();

        config.terminal.id = "  ".to_string();
        assert!(config.validate().is_err());

        config.terminal.id = "till-1".to_string();
        config.backend.base_url = "ws://localhost:8080".to_string();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.backend.base_url = "not a url".to_string();
        assert!(config.validate().unwrap_err().is_config_error());

        config.backend.base_url = "https://pos.example.com/api".to_string();
        assert!(config.validate().is_ok());

        config.sync.max_retries = 0;
        assert!(config.validate().is_err());

        config.sync.max_retries = 3;
        config.sync.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_url_gets_trailing_slash() {
        let mut config = PipelineConfig::default();
        config.backend.base_url = "https://pos.example.com/api".to_string();

        let url = config.backend_url().unwrap();
        assert_eq!(url.as_str(), "https://pos.example.com/api/");
        assert_eq!(
            url.join("sales").unwrap().as_str(),
            "https://pos.example.com/api/sales"
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [terminal]
            id = "till-7"

            [sync]
            max_retries = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.terminal_id(), "till-7");
        assert_eq!(config.terminal.name, "POS Terminal");
        assert_eq!(config.sync.max_retries, 2);
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.validation.debounce(), Duration::from_millis(300));
    }

    #[test]
    fn test_save_then_load_keeps_terminal_id() {
        let path = std::env::temp_dir()
            .join(format!("till-config-{}", uuid::Uuid::new_v4()))
            .join("till.toml");

        let mut config = PipelineConfig::default();
        config.sync.retention_days = 30;
        config.save(Some(path.clone())).unwrap();

        let loaded = PipelineConfig::load(Some(path.clone())).unwrap();
        assert_eq!(loaded.terminal_id(), config.terminal_id());
        assert_eq!(loaded.sync.retention_days, 30);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_toml_serialization() {
        let config = PipelineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[terminal]"));
        assert!(toml_str.contains("[sync]"));
        assert!(toml_str.contains("[connectivity]"));
    }
}
