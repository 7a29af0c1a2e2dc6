//! Configuration system for the fusion workspace.
//! TOML-based, layered resolution: overrides > env > project > user > defaults.

pub mod cache_config;
pub mod device_config;
pub mod fuse_config;

pub use cache_config::CacheConfig;
pub use device_config::DeviceConfig;
pub use fuse_config::{ConfigOverrides, FuseConfig};
