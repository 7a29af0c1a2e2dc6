//! Top-level configuration with layered resolution.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{CacheConfig, DeviceConfig};
use crate::errors::ConfigError;

/// Top-level configuration aggregating all sub-configs.
///
/// Resolution order (highest priority first):
/// 1. Programmatic overrides (applied via `apply_overrides`)
/// 2. Environment variables (`FUSE_*`)
/// 3. Project config (`fuse.toml` in project root)
/// 4. User config (`~/.fuse/config.toml`)
/// 5. Compiled defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FuseConfig {
    pub cache: CacheConfig,
    pub device: DeviceConfig,
}

/// Override values supplied by the embedding compiler driver.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub cache_initial_capacity: Option<usize>,
    pub cache_parallel_prefetch: Option<bool>,
    pub device_name: Option<String>,
    pub device_shared_memory_per_block: Option<u64>,
}

impl FuseConfig {
    /// Load configuration with layered resolution rooted at `root`.
    pub fn load(root: &Path, overrides: Option<&ConfigOverrides>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // User config (lowest file priority). Only malformed TOML is fatal here.
        if let Some(user_config_path) = Self::user_config_path() {
            if user_config_path.exists() {
                match Self::merge_toml_file(&mut config, &user_config_path) {
                    Ok(()) => {}
                    Err(e @ ConfigError::ParseError { .. }) => return Err(e),
                    Err(e) => {
                        tracing::warn!(error = %e, "ignoring unreadable user config");
                    }
                }
            }
        }

        let project_config_path = root.join("fuse.toml");
        if project_config_path.exists() {
            Self::merge_toml_file(&mut config, &project_config_path)?;
        }

        Self::apply_env_overrides(&mut config);

        if let Some(overrides) = overrides {
            Self::apply_overrides(&mut config, overrides);
        }

        Self::validate(&config)?;

        tracing::debug!(root = %root.display(), "configuration loaded");
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            path: "<string>".to_string(),
            message: e.to_string(),
        })
    }

    /// Validate the configuration values.
    pub fn validate(config: &FuseConfig) -> Result<(), ConfigError> {
        if let Some(capacity) = config.cache.initial_capacity {
            if capacity > (1 << 24) {
                return Err(ConfigError::ValidationFailed {
                    field: "cache.initial_capacity".to_string(),
                    message: "must not exceed 16777216".to_string(),
                });
            }
        }
        config.device.resolve().validate()
    }

    fn user_config_path() -> Option<PathBuf> {
        home_dir().map(|h| h.join(".fuse").join("config.toml"))
    }

    /// Merge a TOML file into the existing config.
    /// Unknown keys are silently ignored.
    fn merge_toml_file(config: &mut FuseConfig, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let file_config: FuseConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        Self::merge(config, &file_config);
        Ok(())
    }

    /// Merge `other` into `base`; only `Some` values in `other` win.
    fn merge(base: &mut FuseConfig, other: &FuseConfig) {
        // Cache
        if other.cache.initial_capacity.is_some() {
            base.cache.initial_capacity = other.cache.initial_capacity;
        }
        if other.cache.parallel_prefetch.is_some() {
            base.cache.parallel_prefetch = other.cache.parallel_prefetch;
        }

        // Device
        if other.device.name.is_some() {
            base.device.name = other.device.name.clone();
        }
        if other.device.threads_per_warp.is_some() {
            base.device.threads_per_warp = other.device.threads_per_warp;
        }
        if other.device.threads_per_block_limit.is_some() {
            base.device.threads_per_block_limit = other.device.threads_per_block_limit;
        }
        if other.device.shared_memory_per_block.is_some() {
            base.device.shared_memory_per_block = other.device.shared_memory_per_block;
        }
        if other.device.core_count.is_some() {
            base.device.core_count = other.device.core_count;
        }
        if other.device.clock_rate_ghz.is_some() {
            base.device.clock_rate_ghz = other.device.clock_rate_ghz;
        }
        if other.device.memory_bandwidth.is_some() {
            base.device.memory_bandwidth = other.device.memory_bandwidth;
        }
    }

    /// Apply environment variable overrides. Unparseable values are ignored.
    fn apply_env_overrides(config: &mut FuseConfig) {
        if let Some(v) = env_parse::<usize>("FUSE_CACHE_INITIAL_CAPACITY") {
            config.cache.initial_capacity = Some(v);
        }
        if let Some(v) = env_parse::<bool>("FUSE_CACHE_PARALLEL_PREFETCH") {
            config.cache.parallel_prefetch = Some(v);
        }
        if let Some(v) = env_parse::<u64>("FUSE_DEVICE_THREADS_PER_BLOCK_LIMIT") {
            config.device.threads_per_block_limit = Some(v);
        }
        if let Some(v) = env_parse::<u64>("FUSE_DEVICE_SHARED_MEMORY_PER_BLOCK") {
            config.device.shared_memory_per_block = Some(v);
        }
        if let Some(v) = env_parse::<u64>("FUSE_DEVICE_CORE_COUNT") {
            config.device.core_count = Some(v);
        }
    }

    fn apply_overrides(config: &mut FuseConfig, overrides: &ConfigOverrides) {
        if let Some(v) = overrides.cache_initial_capacity {
            config.cache.initial_capacity = Some(v);
        }
        if let Some(v) = overrides.cache_parallel_prefetch {
            config.cache.parallel_prefetch = Some(v);
        }
        if let Some(ref v) = overrides.device_name {
            config.device.name = Some(v.clone());
        }
        if let Some(v) = overrides.device_shared_memory_per_block {
            config.device.shared_memory_per_block = Some(v);
        }
    }

    /// Serialize the config back to TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            path: "<serialization>".to_string(),
            message: e.to_string(),
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
