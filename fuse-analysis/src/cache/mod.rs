//! Concurrent memoization of fusion analyses with node-keyed invalidation.

pub mod analysis_cache;
pub mod stats;

pub use analysis_cache::{CachedAnalysis, FusionAnalysisCache};
pub use stats::CacheStats;
