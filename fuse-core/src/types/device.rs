//! Compilation target description.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Immutable description of the device the fusion analysis targets.
///
/// Built once (usually from `DeviceConfig::resolve`) and borrowed by every
/// analysis cache for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub name: String,
    pub threads_per_warp: u64,
    pub threads_per_block_limit: u64,
    /// Shared memory available to one block, in bytes.
    pub shared_memory_per_block: u64,
    /// Number of streaming multiprocessors.
    pub core_count: u64,
    pub clock_rate_ghz: f64,
    /// Device memory bandwidth in bytes per second.
    pub memory_bandwidth: u64,
}

impl Default for DeviceDescription {
    fn default() -> Self {
        Self {
            name: "generic-gpu".to_string(),
            threads_per_warp: 32,
            threads_per_block_limit: 1024,
            shared_memory_per_block: 48 * 1024,
            core_count: 80,
            clock_rate_ghz: 1.4,
            memory_bandwidth: 900_000_000_000,
        }
    }
}

impl DeviceDescription {
    /// Check that the description is usable for launch-dimension math.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads_per_warp == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "device.threads_per_warp".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.threads_per_block_limit == 0
            || self.threads_per_block_limit % self.threads_per_warp != 0
        {
            return Err(ConfigError::ValidationFailed {
                field: "device.threads_per_block_limit".to_string(),
                message: format!(
                    "must be a positive multiple of the warp size ({})",
                    self.threads_per_warp
                ),
            });
        }
        if self.shared_memory_per_block == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "device.shared_memory_per_block".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.core_count == 0 {
            return Err(ConfigError::ValidationFailed {
                field: "device.core_count".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if !self.clock_rate_ghz.is_finite() || self.clock_rate_ghz <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "device.clock_rate_ghz".to_string(),
                message: format!("{} is not a clock rate", self.clock_rate_ghz),
            });
        }
        Ok(())
    }

    /// Round a thread count up to a whole number of warps. Saturates at
    /// `u64::MAX`.
    pub fn round_up_to_warp(&self, threads: u64) -> u64 {
        let warp = self.threads_per_warp.max(1);
        threads.max(1).div_ceil(warp).saturating_mul(warp)
    }
}
