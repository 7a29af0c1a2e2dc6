//! Fusion analysis result types.

use fuse_core::types::{NodeId, SmallVec4};
use serde::{Deserialize, Serialize};

/// Code emitter a fusion would be lowered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmitterKind {
    /// One thread per output element.
    Loop,
    /// Row or column reduction, one block per output row.
    Reduction,
    /// Shared-memory tiled transpose.
    Transpose,
    Concatenate,
    /// In-place scatter; always a fusion root.
    Scatter,
}

impl EmitterKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Loop => "loop",
            Self::Reduction => "reduction",
            Self::Transpose => "transpose",
            Self::Concatenate => "concatenate",
            Self::Scatter => "scatter",
        }
    }
}

impl std::fmt::Display for EmitterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Kernel launch grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaunchDimensions {
    pub block_count: u64,
    pub threads_per_block: u64,
}

impl LaunchDimensions {
    pub fn total_threads(&self) -> u64 {
        self.block_count.saturating_mul(self.threads_per_block)
    }
}

/// Result of analyzing one instruction, or a producer fused into a consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionAnalysis {
    pub emitter: EmitterKind,
    /// Instruction that picked the emitter.
    pub hero: NodeId,
    /// Instruction whose result leaves the fusion.
    pub root: NodeId,
    /// Instructions in the fusion, producers first.
    pub fused: SmallVec4<NodeId>,
    pub launch: LaunchDimensions,
    /// Shared memory one block needs, in bytes.
    pub shared_memory_bytes: u64,
}

impl FusionAnalysis {
    /// Whether the analysis covers a producer/consumer pair.
    pub fn is_producer_consumer(&self) -> bool {
        self.fused.len() > 1
    }
}
