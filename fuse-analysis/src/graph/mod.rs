//! Instruction graph: a petgraph StableGraph addressed by never-reused `NodeId`s.

pub mod hlo_graph;
pub mod types;

pub use hlo_graph::HloGraph;
pub use types::{
    Instruction, InstructionSpec, Opcode, OperandEdge, PrimitiveType, Replacement, Shape,
};
