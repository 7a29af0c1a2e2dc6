//! # fuse-analysis
//!
//! Instruction graph, fusion analysis, and the concurrent fusion analysis
//! cache that memoizes analyses per node and per producer/consumer pair.

pub mod analysis;
pub mod cache;
pub mod graph;

pub use analysis::{DefaultFusionAnalyzer, FusionAnalysis, FusionAnalyzer};
pub use cache::{CacheStats, CachedAnalysis, FusionAnalysisCache};
pub use graph::HloGraph;
