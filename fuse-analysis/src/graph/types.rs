//! Instruction graph types: shapes, opcodes, instructions, edges.

use fuse_core::types::NodeId;
use serde::{Deserialize, Serialize};

/// Element type of an array shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveType {
    Pred,
    S32,
    F16,
    BF16,
    F32,
    F64,
}

impl PrimitiveType {
    /// Size of one element in bytes.
    pub fn byte_width(self) -> u64 {
        match self {
            Self::Pred => 1,
            Self::F16 | Self::BF16 => 2,
            Self::S32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// Dense array shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub element_type: PrimitiveType,
    pub dimensions: Vec<u64>,
}

impl Shape {
    pub fn new(element_type: PrimitiveType, dimensions: impl Into<Vec<u64>>) -> Self {
        Self {
            element_type,
            dimensions: dimensions.into(),
        }
    }

    /// Rank-0 shape.
    pub fn scalar(element_type: PrimitiveType) -> Self {
        Self::new(element_type, Vec::new())
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Number of elements. A scalar has one element. Saturates at `u64::MAX`.
    pub fn element_count(&self) -> u64 {
        self.dimensions.iter().fold(1, |acc, &d| acc.saturating_mul(d))
    }

    pub fn byte_size(&self) -> u64 {
        self.element_count()
            .saturating_mul(self.element_type.byte_width())
    }
}

/// Instruction opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Parameter,
    Constant,
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Exp,
    Negate,
    Convert,
    Broadcast,
    Reshape,
    Transpose,
    Reduce,
    Concatenate,
    Scatter,
    Tuple,
    GetTupleElement,
}

impl Opcode {
    /// Pure per-element computation.
    pub fn is_elementwise(self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Subtract
                | Self::Multiply
                | Self::Divide
                | Self::Maximum
                | Self::Exp
                | Self::Negate
                | Self::Convert
        )
    }

    /// Whether the instruction can take part in a fusion at all.
    pub fn is_fusible(self) -> bool {
        !matches!(self, Self::Parameter | Self::Tuple | Self::GetTupleElement)
    }

    /// Instructions that dictate the emitter of the fusion they land in.
    pub fn is_hero(self) -> bool {
        matches!(
            self,
            Self::Transpose | Self::Reduce | Self::Concatenate | Self::Scatter
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Parameter => "parameter",
            Self::Constant => "constant",
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
            Self::Maximum => "maximum",
            Self::Exp => "exponential",
            Self::Negate => "negate",
            Self::Convert => "convert",
            Self::Broadcast => "broadcast",
            Self::Reshape => "reshape",
            Self::Transpose => "transpose",
            Self::Reduce => "reduce",
            Self::Concatenate => "concatenate",
            Self::Scatter => "scatter",
            Self::Tuple => "tuple",
            Self::GetTupleElement => "get-tuple-element",
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One node of the instruction graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub id: NodeId,
    pub name: String,
    pub opcode: Opcode,
    pub shape: Shape,
    /// Opcode-specific dimension list: the permutation of a transpose, the
    /// reduced dimensions of a reduce, the concatenated dimension.
    pub dimensions: Vec<usize>,
}

/// Operand edge from a producer to one of its users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandEdge {
    /// Position of the producer in the user's operand list.
    pub operand_number: usize,
}

/// Description of a new instruction, before it has an id.
#[derive(Debug, Clone)]
pub struct InstructionSpec {
    pub name: String,
    pub opcode: Opcode,
    pub shape: Shape,
    pub dimensions: Vec<usize>,
    pub operands: Vec<NodeId>,
}

impl InstructionSpec {
    pub fn new(name: impl Into<String>, opcode: Opcode, shape: Shape) -> Self {
        Self {
            name: name.into(),
            opcode,
            shape,
            dimensions: Vec::new(),
            operands: Vec::new(),
        }
    }

    pub fn with_operands(mut self, operands: impl Into<Vec<NodeId>>) -> Self {
        self.operands = operands.into();
        self
    }

    pub fn with_dimensions(mut self, dimensions: impl Into<Vec<usize>>) -> Self {
        self.dimensions = dimensions.into();
        self
    }
}

/// Result of replacing an instruction: the old id is dead, the new one is live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub old: NodeId,
    pub new: NodeId,
    /// Users that now read `new` instead of `old`.
    pub users: Vec<NodeId>,
}

impl Replacement {
    /// Ids whose cached analyses no longer describe the graph: the dead
    /// instruction and every user whose operand changed.
    pub fn stale_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::once(self.old).chain(self.users.iter().copied())
    }
}
