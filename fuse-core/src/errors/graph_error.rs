//! Instruction graph errors.

use super::error_code::{self, FuseErrorCode};
use crate::types::NodeId;

/// Errors that can occur while building or mutating the instruction graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Unknown node {id}")]
    UnknownNode { id: NodeId },

    #[error("Cannot remove {id}: still used by {users:?}")]
    HasUsers { id: NodeId, users: Vec<NodeId> },

    #[error("Instruction {id} cannot be its own operand")]
    SelfOperand { id: NodeId },
}

impl FuseErrorCode for GraphError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownNode { .. } => error_code::UNKNOWN_NODE,
            Self::HasUsers { .. } | Self::SelfOperand { .. } => error_code::GRAPH_ERROR,
        }
    }
}
