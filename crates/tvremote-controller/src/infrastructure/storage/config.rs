//! TOML-based configuration for the controller.
//!
//! Reads `AppConfig` from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\TvRemote\config.toml`
//! - Linux:    `~/.config/tvremote/config.toml`
//! - macOS:    `~/Library/Application Support/TvRemote/config.toml`
//!
//! Every field has a serde default, so a missing file, an empty file, or a
//! file written by an older version all load cleanly:
//!
//! ```toml
//! log_level = "debug"
//!
//! [remote]
//! app_name = "Living Room Remote"
//!
//! [discovery]
//! timeout_ms = 5000
//! fallback_probe = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// `tracing` log level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sequencer: SequencerConfig,
    #[serde(default)]
    pub startup: StartupConfig,
}

/// How this controller introduces itself to the TV.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    /// Shown in the TV's "Allow this device?" prompt.
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

/// SSDP search and fallback probe settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// Length of the SSDP listening window.
    #[serde(default = "default_discovery_timeout_ms")]
    pub timeout_ms: u64,
    /// `MX` header: the maximum response delay devices may pick.
    #[serde(default = "default_mx")]
    pub mx: u8,
    /// `ST` header of the M-SEARCH request.
    #[serde(default = "default_search_target")]
    pub search_target: String,
    /// Per-candidate bound on the fallback WebSocket probe.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Probe well-known addresses when SSDP hears nothing at all.
    #[serde(default = "default_true")]
    pub fallback_probe: bool,
    /// Emit `Updated` after a device description fills in name/model.
    #[serde(default = "default_true")]
    pub reemit_on_enrichment: bool,
}

/// Remote-control channel ports and keep-alive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// TLS port of the remote-control channel.
    #[serde(default = "default_secure_port")]
    pub secure_port: u16,
    /// Plaintext port, used only by the discovery probe.
    #[serde(default = "default_probe_port")]
    pub probe_port: u16,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

/// Timing of typed channel numbers and A/B tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequencerConfig {
    #[serde(default = "default_digit_delay_ms")]
    pub digit_delay_ms: u64,
    /// Extra pause between the last digit and ENTER.
    #[serde(default = "default_enter_settle_ms")]
    pub enter_settle_ms: u64,
    /// How long a finished test stays visible before it is cleared.
    #[serde(default = "default_auto_close_grace_ms")]
    pub auto_close_grace_ms: u64,
}

/// Behaviour on process start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartupConfig {
    /// Delay before the single auto-connect attempt.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

impl SequencerConfig {
    pub fn digit_delay(&self) -> Duration {
        Duration::from_millis(self.digit_delay_ms)
    }

    pub fn enter_settle(&self) -> Duration {
        Duration::from_millis(self.enter_settle_ms)
    }

    pub fn auto_close_grace(&self) -> Duration {
        Duration::from_millis(self.auto_close_grace_ms)
    }
}

impl StartupConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_app_name() -> String {
    "SamsungTvRemote".to_string()
}
fn default_discovery_timeout_ms() -> u64 {
    3000
}
fn default_mx() -> u8 {
    2
}
fn default_search_target() -> String {
    "urn:schemas-upnp-org:device:MediaRenderer:1".to_string()
}
fn default_probe_timeout_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}
fn default_secure_port() -> u16 {
    8002
}
fn default_probe_port() -> u16 {
    8001
}
fn default_heartbeat_secs() -> u64 {
    25
}
fn default_digit_delay_ms() -> u64 {
    200
}
fn default_enter_settle_ms() -> u64 {
    100
}
fn default_auto_close_grace_ms() -> u64 {
    1000
}
fn default_settle_delay_ms() -> u64 {
    1000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            remote: RemoteConfig::default(),
            discovery: DiscoveryConfig::default(),
            session: SessionConfig::default(),
            sequencer: SequencerConfig::default(),
            startup: StartupConfig::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_discovery_timeout_ms(),
            mx: default_mx(),
            search_target: default_search_target(),
            probe_timeout_ms: default_probe_timeout_ms(),
            fallback_probe: default_true(),
            reemit_on_enrichment: default_true(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secure_port: default_secure_port(),
            probe_port: default_probe_port(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            digit_delay_ms: default_digit_delay_ms(),
            enter_settle_ms: default_enter_settle_ms(),
            auto_close_grace_ms: default_auto_close_grace_ms(),
        }
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for config and state files.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Loads `AppConfig` from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Persists `config` to `path`, creating the parent directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory, including the app subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("TvRemote"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("tvremote"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("TvRemote")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("tvremote-config-test-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_default_config_matches_protocol_constants() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.session.secure_port, 8002);
        assert_eq!(cfg.session.probe_port, 8001);
        assert_eq!(cfg.session.heartbeat_interval(), Duration::from_secs(25));
        assert_eq!(cfg.sequencer.digit_delay(), Duration::from_millis(200));
        assert_eq!(cfg.sequencer.enter_settle(), Duration::from_millis(100));
        assert_eq!(cfg.startup.settle_delay(), Duration::from_secs(1));
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn test_empty_toml_yields_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("empty file must parse");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        // Arrange
        let text = "[discovery]\ntimeout_ms = 500\nfallback_probe = false\n";

        // Act
        let cfg: AppConfig = toml::from_str(text).expect("parse");

        // Assert
        assert_eq!(cfg.discovery.timeout(), Duration::from_millis(500));
        assert!(!cfg.discovery.fallback_probe);
        assert_eq!(cfg.discovery.mx, 2);
        assert_eq!(
            cfg.discovery.search_target,
            "urn:schemas-upnp-org:device:MediaRenderer:1"
        );
        assert_eq!(cfg.remote.app_name, "SamsungTvRemote");
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let cfg = load_config_from(&temp_path("absent.toml")).expect("missing file is not an error");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_then_load_preserves_changes() {
        // Arrange
        let path = temp_path("config.toml");
        let mut cfg = AppConfig::default();
        cfg.remote.app_name = "Bedroom".to_string();
        cfg.sequencer.digit_delay_ms = 350;

        // Act
        save_config_to(&path, &cfg).expect("save");
        let loaded = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let result: Result<AppConfig, _> = toml::from_str("[discovery\n");
        assert!(result.is_err());
    }
}
