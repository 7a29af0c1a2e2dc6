//! Device configuration.

use serde::{Deserialize, Serialize};

use crate::types::DeviceDescription;

/// Partial device description as written in config files.
/// Missing fields fall back to `DeviceDescription::default()`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: Option<String>,
    pub threads_per_warp: Option<u64>,
    pub threads_per_block_limit: Option<u64>,
    pub shared_memory_per_block: Option<u64>,
    pub core_count: Option<u64>,
    pub clock_rate_ghz: Option<f64>,
    pub memory_bandwidth: Option<u64>,
}

impl DeviceConfig {
    /// Build the immutable device description, filling gaps with defaults.
    pub fn resolve(&self) -> DeviceDescription {
        let defaults = DeviceDescription::default();
        DeviceDescription {
            name: self.name.clone().unwrap_or(defaults.name),
            threads_per_warp: self.threads_per_warp.unwrap_or(defaults.threads_per_warp),
            threads_per_block_limit: self
                .threads_per_block_limit
                .unwrap_or(defaults.threads_per_block_limit),
            shared_memory_per_block: self
                .shared_memory_per_block
                .unwrap_or(defaults.shared_memory_per_block),
            core_count: self.core_count.unwrap_or(defaults.core_count),
            clock_rate_ghz: self.clock_rate_ghz.unwrap_or(defaults.clock_rate_ghz),
            memory_bandwidth: self.memory_bandwidth.unwrap_or(defaults.memory_bandwidth),
        }
    }
}
