//! Analysis cache configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the fusion analysis cache.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries pre-sized in each cache map (single, pair, both reverse indexes). Default: 0.
    pub initial_capacity: Option<usize>,
    /// Warm the cache on the rayon pool during prefetch. Default: true.
    pub parallel_prefetch: Option<bool>,
}

impl CacheConfig {
    /// Returns the effective initial capacity, defaulting to 0.
    pub fn effective_initial_capacity(&self) -> usize {
        self.initial_capacity.unwrap_or(0)
    }

    /// Returns whether prefetch runs in parallel, defaulting to true.
    pub fn effective_parallel_prefetch(&self) -> bool {
        self.parallel_prefetch.unwrap_or(true)
    }
}
