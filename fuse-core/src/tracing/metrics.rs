//! Structured field names used in cache and analysis log events.
//!
//! Consistent names keep log queries stable across subsystems.

/// Cache: hit rate over all lookups (0.0 - 1.0).
pub const CACHE_HIT_RATE: &str = "cache_hit_rate";

/// Analysis: wall time of one analysis computation in microseconds.
pub const ANALYSIS_TIME_US: &str = "analysis_time_us";

/// Cache: pair entries erased by one invalidation.
pub const INVALIDATED_PAIRS: &str = "invalidated_pairs";

/// Cache: number of keys warmed by one prefetch call.
pub const PREFETCH_KEYS: &str = "prefetch_keys";
