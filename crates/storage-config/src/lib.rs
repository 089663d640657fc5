//! Agent configuration management
//!
//! Settings shared by the control-plane drivers and the host agent: where
//! image caches live, where the kernel publishes device symlinks, which
//! external tools to run and how long to wait for them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable prefix for overrides, e.g. `ISCSI_STORAGE_PROBE_TIMEOUT_SECS`.
pub const ENV_PREFIX: &str = "ISCSI_STORAGE";

pub const DEFAULT_IMAGE_CACHE_DIR: &str = "/opt/cloud/workspace/disks/image_cache";
pub const DEFAULT_DEVICE_BY_PATH_DIR: &str = "/dev/disk/by-path";

const STANDARD_CONFIG_PATHS: &[&str] = &[
    "/etc/cloud/iscsi-storage.toml",
    "/etc/cloud/iscsi-storage.conf",
    "./iscsi-storage.toml",
];

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Directory recorded on newly provisioned cache records.
    pub default_image_cache_dir: PathBuf,
    /// Device-symlink directory scanned by the device path resolver.
    pub device_by_path_dir: PathBuf,
    pub iscsiadm_path: String,
    pub blockdev_path: String,
    /// Upper bound for a single initiator or blockdev invocation.
    pub command_timeout_secs: u64,
    /// Upper bound for the TCP reachability probe.
    pub probe_timeout_secs: u64,
    pub device_wait_timeout_secs: u64,
    pub device_poll_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_image_cache_dir: PathBuf::from(DEFAULT_IMAGE_CACHE_DIR),
            device_by_path_dir: PathBuf::from(DEFAULT_DEVICE_BY_PATH_DIR),
            iscsiadm_path: "iscsiadm".to_string(),
            blockdev_path: "blockdev".to_string(),
            command_timeout_secs: 60,
            probe_timeout_secs: 10,
            device_wait_timeout_secs: 30,
            device_poll_interval_ms: 1000,
        }
    }
}

impl AgentConfig {
    /// Load configuration from file, with environment overrides on top
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: AgentConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the first standard location that exists, falling back to
    /// defaults plus environment overrides.
    pub fn load_with_defaults() -> Result<Self, ConfigError> {
        for path in STANDARD_CONFIG_PATHS {
            if Path::new(path).exists() {
                match Self::load_from_file(path) {
                    Ok(config) => {
                        log::info!("Loaded agent configuration from {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", path, e);
                    }
                }
            }
        }

        let settings = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;
        let config: AgentConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("command_timeout_secs", self.command_timeout_secs),
            ("probe_timeout_secs", self.probe_timeout_secs),
            ("device_wait_timeout_secs", self.device_wait_timeout_secs),
            ("device_poll_interval_ms", self.device_poll_interval_ms),
        ];
        for (key, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if self.device_poll_interval() > self.device_wait_timeout() {
            return Err(ConfigError::Invalid {
                key: "device_poll_interval_ms",
                reason: format!(
                    "{}ms exceeds the device wait timeout of {}s",
                    self.device_poll_interval_ms, self.device_wait_timeout_secs
                ),
            });
        }

        if self.iscsiadm_path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "iscsiadm_path",
                reason: "must not be empty".to_string(),
            });
        }
        if self.blockdev_path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "blockdev_path",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn device_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.device_wait_timeout_secs)
    }

    pub fn device_poll_interval(&self) -> Duration {
        Duration::from_millis(self.device_poll_interval_ms)
    }
}
