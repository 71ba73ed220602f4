//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MIRROR_SERVER_URL=wss://sync.example.com/ws                        │
//! │     MIRROR_DEVICE_ID=abc-123                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/mirror/sync.toml (Linux)                                 │
//! │     ~/Library/Application Support/dev.mirror.mirror/sync.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     1s→30s backoff, 5 attempts, 30s heartbeat, 5s drain, 60s resync    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Laptop"
//!
//! [server]
//! url = "ws://127.0.0.1:8765/ws"
//!
//! [transport]
//! initial_backoff_ms = 1000
//! max_backoff_ms = 30000
//! max_attempts = 5
//! heartbeat_secs = 30
//!
//! [sync]
//! drain_interval_secs = 5
//! resync_interval_secs = 60
//! stale_after_secs = 300
//!
//! [storage]
//! database_path = "mirror.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::hub::HubConfig;
use crate::synchronizer::SynchronizerConfig;
use crate::transport::TransportConfig;

// =============================================================================
// Device Configuration
// =============================================================================

/// Identity of this client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4), used as the default actor id.
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name.
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Mirror Client".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Server Settings
// =============================================================================

/// Where to connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// WebSocket URL of the sync server.
    #[serde(default = "default_server_url")]
    pub url: String,
}

fn default_server_url() -> String {
    "ws://127.0.0.1:8765/ws".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            url: default_server_url(),
        }
    }
}

// =============================================================================
// Transport Settings
// =============================================================================

/// Reconnection and keepalive behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Delay before the first reconnect (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Reconnect delay cap (milliseconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Consecutive failed connects before automatic retry stops.
    /// Set to 0 for infinite retries.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Heartbeat interval while connected (seconds).
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_initial_backoff() -> u64 {
    1000
}
fn default_max_backoff() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_heartbeat() -> u64 {
    30
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings {
            connect_timeout_secs: default_connect_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_attempts: default_max_attempts(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Synchronizer timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between pending-queue drains (seconds).
    #[serde(default = "default_drain_interval")]
    pub drain_interval_secs: u64,

    /// Interval between cursor resyncs (seconds).
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,

    /// Pending age after which a change is reported as stuck (seconds).
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// How often pending ages are checked (seconds).
    #[serde(default = "default_stale_check")]
    pub stale_check_secs: u64,

    /// How long a pull waits for its `sync_response` (seconds).
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,
}

fn default_drain_interval() -> u64 {
    5
}
fn default_resync_interval() -> u64 {
    60
}
fn default_stale_after() -> u64 {
    300
}
fn default_stale_check() -> u64 {
    30
}
fn default_sync_timeout() -> u64 {
    30
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            drain_interval_secs: default_drain_interval(),
            resync_interval_secs: default_resync_interval(),
            stale_after_secs: default_stale_after(),
            stale_check_secs: default_stale_check(),
            sync_timeout_secs: default_sync_timeout(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Local persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file. When absent the engine keeps state in memory only and
    /// performs a full resync on every start.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Hub Settings
// =============================================================================

/// Reference relay server settings (`mirror-agent hub`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Port for the WebSocket server.
    #[serde(default = "default_hub_port")]
    pub port: u16,

    /// Bind address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_hub_port() -> u16 {
    8765
}

fn default_bind_addr() -> String {
    "127.0.0.1".to_string()
}

impl Default for HubSettings {
    fn default() -> Self {
        HubSettings {
            port: default_hub_port(),
            bind_addr: default_bind_addr(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub transport: TransportSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub hub: HubSettings,
}

impl SyncConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| SyncError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<PathBuf> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(path)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        let url = Url::parse(&self.server.url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(SyncError::InvalidUrl(format!(
                "Server URL must start with ws:// or wss://, got: {}",
                self.server.url
            )));
        }

        let t = &self.transport;
        if t.initial_backoff_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "initial_backoff_ms must be greater than 0".into(),
            ));
        }
        if t.max_backoff_ms < t.initial_backoff_ms {
            return Err(SyncError::InvalidConfig(
                "max_backoff_ms must be at least initial_backoff_ms".into(),
            ));
        }

        let s = &self.sync;
        for (name, value) in [
            ("transport.connect_timeout_secs", t.connect_timeout_secs),
            ("transport.heartbeat_secs", t.heartbeat_secs),
            ("sync.drain_interval_secs", s.drain_interval_secs),
            ("sync.resync_interval_secs", s.resync_interval_secs),
            ("sync.stale_check_secs", s.stale_check_secs),
            ("sync.sync_timeout_secs", s.sync_timeout_secs),
        ] {
            if value == 0 {
                return Err(SyncError::InvalidConfig(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("MIRROR_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(name) = std::env::var("MIRROR_DEVICE_NAME") {
            self.device.name = name;
        }

        if let Ok(url) = std::env::var("MIRROR_SERVER_URL") {
            debug!(url = %url, "Overriding server URL from environment");
            self.server.url = url;
        }

        if let Ok(path) = std::env::var("MIRROR_DATABASE_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }

        if let Ok(attempts) = std::env::var("MIRROR_MAX_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(n) => self.transport.max_attempts = n,
                Err(_) => warn!(value = %attempts, "Ignoring invalid MIRROR_MAX_ATTEMPTS"),
            }
        }

        if let Ok(port) = std::env::var("MIRROR_HUB_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding hub port from environment");
                self.hub.port = p;
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "mirror", "mirror")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Component Configs
    // =========================================================================

    /// Settings for the transport actor.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            url: self.server.url.clone(),
            connect_timeout: Duration::from_secs(self.transport.connect_timeout_secs),
            initial_backoff: Duration::from_millis(self.transport.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.transport.max_backoff_ms),
            max_attempts: self.transport.max_attempts,
            heartbeat_interval: Duration::from_secs(self.transport.heartbeat_secs),
        }
    }

    /// Settings for the synchronizer actor.
    pub fn synchronizer_config(&self) -> SynchronizerConfig {
        SynchronizerConfig {
            actor_id: Some(self.device.id.clone()),
            drain_interval: Duration::from_secs(self.sync.drain_interval_secs),
            resync_interval: Duration::from_secs(self.sync.resync_interval_secs),
            stale_after: Duration::from_secs(self.sync.stale_after_secs),
            stale_check_interval: Duration::from_secs(self.sync.stale_check_secs),
            sync_timeout: Duration::from_secs(self.sync.sync_timeout_secs),
        }
    }

    /// Settings for the reference relay.
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            port: self.hub.port,
            bind_addr: self.hub.bind_addr.clone(),
        }
    }

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(!config.device.id.is_empty());
        assert_eq!(config.transport.initial_backoff_ms, 1000);
        assert_eq!(config.transport.max_backoff_ms, 30_000);
        assert_eq!(config.transport.max_attempts, 5);
        assert_eq!(config.transport.heartbeat_secs, 30);
        assert_eq!(config.sync.drain_interval_secs, 5);
        assert_eq!(config.sync.resync_interval_secs, 60);
        assert_eq!(config.sync.stale_after_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.device.id = String::new();
        assert!(matches!(config.validate(), Err(SyncError::MissingDeviceId)));

        config.device.id = "test".to_string();
        config.server.url = "http://localhost:8765".to_string();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.server.url = "not a url".to_string();
        assert!(config.validate().unwrap_err().is_config_error());

        config.server.url = "wss://sync.example.com/ws".to_string();
        assert!(config.validate().is_ok());

        config.transport.max_backoff_ms = 10;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        config.transport.max_backoff_ms = 30_000;
        config.sync.drain_interval_secs = 0;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [device]
            id = "dev-1"

            [transport]
            max_attempts = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.device.id, "dev-1");
        assert_eq!(config.device.name, "Mirror Client");
        assert_eq!(config.transport.max_attempts, 0);
        assert_eq!(config.transport.initial_backoff_ms, 1000);
        assert_eq!(config.sync.resync_interval_secs, 60);
        assert!(config.storage.database_path.is_none());
    }

    #[test]
    fn test_toml_serialization() {
        let config = SyncConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[device]"));
        assert!(toml_str.contains("[transport]"));
        assert!(toml_str.contains("[sync]"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("mirror-config-{}", Uuid::new_v4()));
        let path = dir.join("sync.toml");

        let mut config = SyncConfig::default();
        config.device.id = "saved-device".to_string();
        config.server.url = "ws://10.0.0.5:9000/ws".to_string();
        config.save(Some(path.clone())).unwrap();

        let loaded: SyncConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.device.id, "saved-device");
        assert_eq!(loaded.server.url, "ws://10.0.0.5:9000/ws");

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_unreadable_config_fails_to_load() {
        let dir = std::env::temp_dir().join(format!("mirror-config-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let err = SyncConfig::load(Some(dir.clone())).unwrap_err();
        assert!(matches!(err, SyncError::ConfigLoadFailed(_)));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_component_configs() {
        let config = SyncConfig::default();

        let transport = config.transport_config();
        assert_eq!(transport.initial_backoff, Duration::from_secs(1));
        assert_eq!(transport.max_backoff, Duration::from_secs(30));
        assert_eq!(transport.heartbeat_interval, Duration::from_secs(30));

        let sync = config.synchronizer_config();
        assert_eq!(sync.actor_id.as_deref(), Some(config.device_id()));
        assert_eq!(sync.stale_after, Duration::from_secs(300));

        assert_eq!(config.hub_config().bind_address(), "127.0.0.1:8765");
    }
}
