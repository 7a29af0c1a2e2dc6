//! The instruction graph: a petgraph StableGraph keyed by stable node ids.

use fuse_core::errors::GraphError;
use fuse_core::types::collections::{FxHashMap, FxHashSet};
use fuse_core::types::{NodeId, NodeIdGenerator};
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::{Directed, Direction};

use super::types::{Instruction, InstructionSpec, OperandEdge, Replacement};

/// Directed instruction graph. Edges run from an operand (producer) to its
/// user (consumer).
///
/// Petgraph recycles vacant `NodeIndex` slots, so callers never see them;
/// every instruction is addressed by a `NodeId` minted once and never reused.
pub struct HloGraph {
    graph: StableGraph<Instruction, OperandEdge, Directed>,
    node_index: FxHashMap<NodeId, NodeIndex>,
    ids: NodeIdGenerator,
}

impl HloGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            graph: StableGraph::new(),
            node_index: FxHashMap::default(),
            ids: NodeIdGenerator::new(),
        }
    }

    pub fn instruction_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether `id` names a live instruction.
    pub fn contains(&self, id: NodeId) -> bool {
        self.node_index.contains_key(&id)
    }

    /// Look up a live instruction. Stale ids yield `None`.
    pub fn instruction(&self, id: NodeId) -> Option<&Instruction> {
        self.node_index
            .get(&id)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Iterate over all live instructions in unspecified order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.graph.node_weights()
    }

    /// Add an instruction whose operands must already be in the graph.
    pub fn add_instruction(&mut self, spec: InstructionSpec) -> Result<NodeId, GraphError> {
        let operands = self.resolve_all(&spec.operands)?;
        let id = self.ids.next_id();
        let idx = self.insert_node(id, &spec);
        for (operand_number, operand) in operands.into_iter().enumerate() {
            self.graph
                .add_edge(operand, idx, OperandEdge { operand_number });
        }
        tracing::trace!(node = %id, opcode = %spec.opcode, "instruction added");
        Ok(id)
    }

    /// Operands of `id` in operand order. Empty for stale ids.
    pub fn operands(&self, id: NodeId) -> Vec<NodeId> {
        let Some(&idx) = self.node_index.get(&id) else {
            return Vec::new();
        };
        let mut edges: Vec<(usize, NodeId)> = self
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (e.weight().operand_number, self.graph[e.source()].id))
            .collect();
        edges.sort_unstable_by_key(|&(n, _)| n);
        edges.into_iter().map(|(_, id)| id).collect()
    }

    /// Distinct users of `id`, sorted by id. Empty for stale ids.
    pub fn users(&self, id: NodeId) -> Vec<NodeId> {
        let Some(&idx) = self.node_index.get(&id) else {
            return Vec::new();
        };
        let mut users: Vec<NodeId> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].id)
            .collect();
        users.sort_unstable();
        users.dedup();
        users
    }

    /// Whether `consumer` reads `producer` directly.
    pub fn is_operand_of(&self, producer: NodeId, consumer: NodeId) -> bool {
        match (self.node_index.get(&producer), self.node_index.get(&consumer)) {
            (Some(&p), Some(&c)) => self.graph.contains_edge(p, c),
            _ => false,
        }
    }

    /// Every distinct (producer, consumer) edge, sorted.
    pub fn producer_consumer_pairs(&self) -> Vec<(NodeId, NodeId)> {
        let pairs: FxHashSet<(NodeId, NodeId)> = (&self.graph)
            .edge_references()
            .map(|e| (self.graph[e.source()].id, self.graph[e.target()].id))
            .collect();
        let mut pairs: Vec<_> = pairs.into_iter().collect();
        pairs.sort_unstable();
        pairs
    }

    /// Replace `old` with a freshly minted instruction built from `spec`.
    ///
    /// Users of `old` are rewired to the new instruction at the same operand
    /// positions, then `old` is removed. Its id is dead from here on, so any
    /// analysis cached for it (and for its users) must be invalidated by the
    /// caller; `Replacement::stale_ids` lists exactly those ids.
    pub fn replace_instruction(
        &mut self,
        old: NodeId,
        spec: InstructionSpec,
    ) -> Result<Replacement, GraphError> {
        let old_idx = self.resolve(old)?;
        if spec.operands.contains(&old) {
            return Err(GraphError::SelfOperand { id: old });
        }
        let operands = self.resolve_all(&spec.operands)?;

        let user_edges: Vec<(NodeIndex, OperandEdge)> = self
            .graph
            .edges_directed(old_idx, Direction::Outgoing)
            .map(|e| (e.target(), *e.weight()))
            .collect();
        let users = self.users(old);

        let new = self.ids.next_id();
        let new_idx = self.insert_node(new, &spec);
        for (operand_number, operand) in operands.into_iter().enumerate() {
            self.graph
                .add_edge(operand, new_idx, OperandEdge { operand_number });
        }
        for (user, edge) in user_edges {
            self.graph.add_edge(new_idx, user, edge);
        }

        self.graph.remove_node(old_idx);
        self.node_index.remove(&old);

        tracing::debug!(old = %old, new = %new, users = users.len(), "instruction replaced");
        Ok(Replacement { old, new, users })
    }

    /// Remove an instruction that has no users.
    pub fn remove_instruction(&mut self, id: NodeId) -> Result<Instruction, GraphError> {
        let idx = self.resolve(id)?;
        let users = self.users(id);
        if !users.is_empty() {
            return Err(GraphError::HasUsers { id, users });
        }
        self.node_index.remove(&id);
        let removed = self
            .graph
            .remove_node(idx)
            .ok_or(GraphError::UnknownNode { id })?;
        tracing::debug!(node = %id, "instruction removed");
        Ok(removed)
    }

    fn insert_node(&mut self, id: NodeId, spec: &InstructionSpec) -> NodeIndex {
        let idx = self.graph.add_node(Instruction {
            id,
            name: spec.name.clone(),
            opcode: spec.opcode,
            shape: spec.shape.clone(),
            dimensions: spec.dimensions.clone(),
        });
        self.node_index.insert(id, idx);
        idx
    }

    fn resolve(&self, id: NodeId) -> Result<NodeIndex, GraphError> {
        self.node_index
            .get(&id)
            .copied()
            .ok_or(GraphError::UnknownNode { id })
    }

    fn resolve_all(&self, ids: &[NodeId]) -> Result<Vec<NodeIndex>, GraphError> {
        ids.iter().map(|&id| self.resolve(id)).collect()
    }
}

impl Default for HloGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::{Opcode, PrimitiveType, Shape};

    fn f32s(dims: &[u64]) -> Shape {
        Shape::new(PrimitiveType::F32, dims.to_vec())
    }

    fn param(graph: &mut HloGraph, name: &str) -> NodeId {
        graph
            .add_instruction(InstructionSpec::new(name, Opcode::Parameter, f32s(&[8, 8])))
            .unwrap()
    }

    #[test]
    fn operands_keep_operand_order() {
        let mut graph = HloGraph::new();
        let a = param(&mut graph, "a");
        let b = param(&mut graph, "b");
        let sub = graph
            .add_instruction(
                InstructionSpec::new("sub", Opcode::Subtract, f32s(&[8, 8]))
                    .with_operands([b, a]),
            )
            .unwrap();
        assert_eq!(graph.operands(sub), vec![b, a]);
        assert_eq!(graph.users(a), vec![sub]);
        assert!(graph.is_operand_of(a, sub));
        assert!(!graph.is_operand_of(sub, a));
    }

    #[test]
    fn unknown_operand_is_rejected() {
        let mut graph = HloGraph::new();
        let err = graph
            .add_instruction(
                InstructionSpec::new("neg", Opcode::Negate, f32s(&[4]))
                    .with_operands([NodeId::from_raw(99)]),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode { .. }));
        assert_eq!(graph.instruction_count(), 0);
    }

    #[test]
    fn replace_mints_new_id_and_rewires_users() {
        let mut graph = HloGraph::new();
        let a = param(&mut graph, "a");
        let exp = graph
            .add_instruction(InstructionSpec::new("exp", Opcode::Exp, f32s(&[8, 8])).with_operands([a]))
            .unwrap();
        let neg = graph
            .add_instruction(InstructionSpec::new("neg", Opcode::Negate, f32s(&[8, 8])).with_operands([exp]))
            .unwrap();

        let replacement = graph
            .replace_instruction(
                exp,
                InstructionSpec::new("exp.1", Opcode::Exp, f32s(&[8, 8])).with_operands([a]),
            )
            .unwrap();

        assert_eq!(replacement.old, exp);
        assert_ne!(replacement.new, exp);
        assert_eq!(replacement.users, vec![neg]);
        assert!(!graph.contains(exp));
        assert_eq!(graph.operands(neg), vec![replacement.new]);
        assert_eq!(graph.users(a), vec![replacement.new]);
        assert_eq!(graph.instruction_count(), 3);
    }

    #[test]
    fn replace_with_self_operand_fails() {
        let mut graph = HloGraph::new();
        let a = param(&mut graph, "a");
        let err = graph
            .replace_instruction(
                a,
                InstructionSpec::new("neg", Opcode::Negate, f32s(&[8, 8])).with_operands([a]),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::SelfOperand { .. }));
        assert!(graph.contains(a));
    }

    #[test]
    fn remove_requires_no_users() {
        let mut graph = HloGraph::new();
        let a = param(&mut graph, "a");
        let neg = graph
            .add_instruction(InstructionSpec::new("neg", Opcode::Negate, f32s(&[8, 8])).with_operands([a]))
            .unwrap();

        assert!(matches!(
            graph.remove_instruction(a),
            Err(GraphError::HasUsers { .. })
        ));
        let removed = graph.remove_instruction(neg).unwrap();
        assert_eq!(removed.id, neg);
        graph.remove_instruction(a).unwrap();
        assert_eq!(graph.instruction_count(), 0);
        assert!(graph.instruction(a).is_none());
    }

    #[test]
    fn ids_are_not_reused_after_removal() {
        let mut graph = HloGraph::new();
        let a = param(&mut graph, "a");
        graph.remove_instruction(a).unwrap();
        let b = param(&mut graph, "b");
        assert_ne!(a, b);
    }

    #[test]
    fn pairs_are_deduplicated() {
        let mut graph = HloGraph::new();
        let a = param(&mut graph, "a");
        let sq = graph
            .add_instruction(
                InstructionSpec::new("sq", Opcode::Multiply, f32s(&[8, 8])).with_operands([a, a]),
            )
            .unwrap();
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.producer_consumer_pairs(), vec![(a, sq)]);
    }
}
