//! Daemon configuration
//!
//! Read from `/etc/tunectl/config.json` when present. Every field has a
//! default, so a partial file only overrides what it names.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tc_error::TunectlError;
use tracing::{debug, info};

use crate::constants::{paths, timing};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,
    /// Where tuning profiles are stored
    pub profiles_dir: PathBuf,
    /// Curve sampling period in milliseconds
    pub curve_interval_ms: u64,
    /// GPU used by profiles that do not name one
    pub default_device_id: u32,
    /// Return curve-driven fans to firmware control on exit
    pub release_fans_on_shutdown: bool,
    /// hwmon root scanned for fans and temperature inputs
    pub hwmon_base: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(paths::SOCKET_PATH),
            profiles_dir: paths::default_profiles_dir(),
            curve_interval_ms: timing::DEFAULT_CURVE_INTERVAL_MS,
            default_device_id: 0,
            release_fans_on_shutdown: true,
            hwmon_base: PathBuf::from(paths::HWMON_BASE),
        }
    }
}

impl DaemonConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| TunectlError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: DaemonConfig = serde_json::from_str(&contents)
            .map_err(|e| TunectlError::config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.curve_interval_ms < timing::MIN_CURVE_INTERVAL_MS {
            return Err(TunectlError::config(format!(
                "curve_interval_ms must be at least {}",
                timing::MIN_CURVE_INTERVAL_MS
            )));
        }
        if !self.socket_path.is_absolute() {
            return Err(TunectlError::config("socket_path must be absolute"));
        }
        if self.profiles_dir.as_os_str().is_empty() {
            return Err(TunectlError::config("profiles_dir must not be empty"));
        }
        Ok(())
    }

    pub fn curve_interval(&self) -> Duration {
        Duration::from_millis(self.curve_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = DaemonConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.curve_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"curve_interval_ms": 500, "default_device_id": 1}"#).unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.curve_interval_ms, 500);
        assert_eq!(config.default_device_id, 1);
        assert!(config.release_fans_on_shutdown);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        fs::write(&path, r#"{"curve_interval_ms": 10}"#).unwrap();
        assert!(matches!(DaemonConfig::load(&path), Err(TunectlError::Config(_))));

        fs::write(&path, r#"{"socket_path": "relative.sock"}"#).unwrap();
        assert!(matches!(DaemonConfig::load(&path), Err(TunectlError::Config(_))));

        fs::write(&path, r#"{"unknown_key": true}"#).unwrap();
        assert!(matches!(DaemonConfig::load(&path), Err(TunectlError::Config(_))));
    }
}
