//! Fusion analysis: the pure computation the cache memoizes.

pub mod analyzer;
pub mod types;

pub use analyzer::{
    analyze_fusion, analyze_producer_consumer_fusion, DefaultFusionAnalyzer, FusionAnalyzer,
};
pub use types::{EmitterKind, FusionAnalysis, LaunchDimensions};
