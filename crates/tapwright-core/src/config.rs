//! Persistent configuration for tapwright.
//!
//! Stores user settings in `~/.tapwright/config.json`: a manual SDK root to
//! consider during toolchain detection, where to install missing tools, and
//! the timeouts applied to device commands.
//!
//! # Example
//!
//! ```no_run
//! use tapwright_core::config::TapwrightConfig;
//!
//! // Load (returns defaults if file doesn't exist)
//! let config = TapwrightConfig::load();
//!
//! println!("command timeout: {:?}", config.command_timeout());
//! if let Some(root) = &config.sdk_root {
//!     println!("manual SDK root: {}", root.display());
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

const CONFIG_FILENAME: &str = "config.json";

/// Default per-command timeout.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;
/// Default time to wait for a booted device to show up.
pub const DEFAULT_BOOT_TIMEOUT_MS: u64 = 120_000;
/// Default delay between boot confirmation polls.
pub const DEFAULT_BOOT_POLL_INTERVAL_MS: u64 = 1_000;

/// Returns `~/.tapwright`, falling back to `./.tapwright` when the home
/// directory is unknown. The directory is not created.
pub fn tapwright_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tapwright")
}

/// Returns `~/.tapwright/logs`.
pub fn logs_dir() -> PathBuf {
    tapwright_dir().join("logs")
}

/// Persistent tapwright configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapwrightConfig {
    /// SDK root to report as a `Manual` tool location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_root: Option<PathBuf>,

    /// Where `tools install` puts the SDK when no location is given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<PathBuf>,

    /// Hard timeout for a single external command, in milliseconds.
    pub command_timeout_ms: u64,

    /// How long `boot` waits for the device to appear as running.
    pub boot_timeout_ms: u64,

    /// Delay between boot confirmation polls.
    pub boot_poll_interval_ms: u64,
}

impl Default for TapwrightConfig {
    fn default() -> Self {
        Self {
            sdk_root: None,
            install_dir: None,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            boot_timeout_ms: DEFAULT_BOOT_TIMEOUT_MS,
            boot_poll_interval_ms: DEFAULT_BOOT_POLL_INTERVAL_MS,
        }
    }
}

impl TapwrightConfig {
    /// Path of the config file.
    pub fn path() -> PathBuf {
        tapwright_dir().join(CONFIG_FILENAME)
    }

    /// Load config from `~/.tapwright/config.json`.
    ///
    /// Returns [`Default`] if the file does not exist or cannot be parsed.
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from an explicit path, with the same fallback as [`load`](Self::load).
    pub fn load_from(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                debug!(path = %path.display(), error = %e, "ignoring unparseable config");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save config to `~/.tapwright/config.json`.
    pub fn save(&self) -> std::io::Result<()> {
        self.save_to(&Self::path())
    }

    /// Save config to an explicit path, creating parent directories.
    pub fn save_to(&self, path: &std::path::Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// [`command_timeout_ms`](Self::command_timeout_ms) as a duration.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// [`boot_timeout_ms`](Self::boot_timeout_ms) as a duration.
    pub fn boot_timeout(&self) -> Duration {
        Duration::from_millis(self.boot_timeout_ms)
    }

    /// [`boot_poll_interval_ms`](Self::boot_poll_interval_ms) as a duration.
    pub fn boot_poll_interval(&self) -> Duration {
        Duration::from_millis(self.boot_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_documented_timeouts() {
        let config = TapwrightConfig::default();
        assert!(config.sdk_root.is_none());
        assert_eq!(config.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.boot_timeout(), Duration::from_secs(120));
        assert_eq!(config.boot_poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let loaded: TapwrightConfig =
            serde_json::from_str(r#"{"sdk_root": "/opt/android", "command_timeout_ms": 500}"#).unwrap();
        assert_eq!(loaded.sdk_root, Some(PathBuf::from("/opt/android")));
        assert_eq!(loaded.command_timeout_ms, 500);
        assert_eq!(loaded.boot_timeout_ms, DEFAULT_BOOT_TIMEOUT_MS);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILENAME);
        let config = TapwrightConfig {
            install_dir: Some(PathBuf::from("/tmp/sdk")),
            boot_timeout_ms: 60_000,
            ..TapwrightConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(TapwrightConfig::load_from(&path), config);
    }

    #[test]
    fn missing_or_garbage_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        assert_eq!(TapwrightConfig::load_from(&path), TapwrightConfig::default());
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(TapwrightConfig::load_from(&path), TapwrightConfig::default());
    }
}
