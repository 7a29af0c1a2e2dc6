//! Emitter selection and launch dimensions.
//!
//! Both entry points are pure: same graph, ids, and device give the same
//! answer. "Cannot fuse" is `None`, never an error.

use std::time::Instant;

use fuse_core::tracing::metrics;
use fuse_core::types::{DeviceDescription, NodeId};
use smallvec::smallvec;

use super::types::{EmitterKind, FusionAnalysis, LaunchDimensions};
use crate::graph::{HloGraph, Instruction, Opcode, Shape};

/// Edge of the square tile a transpose stages through shared memory.
const TRANSPOSE_TILE: u64 = 32;

/// Rows of the transpose tile one block iterates over per pass.
const TRANSPOSE_ROWS_PER_PASS: u64 = 4;

/// Upper bound on threads a loop emitter puts in one block.
const LOOP_BLOCK_THREADS: u64 = 128;

/// The analysis function the cache memoizes.
///
/// Implementations must be pure with respect to the cache: no side effects the
/// cache could observe, and `None` for anything that cannot be fused.
pub trait FusionAnalyzer: Send + Sync {
    /// Analyze `node` as a fusion on its own.
    fn analyze_fusion(
        &self,
        graph: &HloGraph,
        node: NodeId,
        device: &DeviceDescription,
    ) -> Option<FusionAnalysis>;

    /// Analyze `producer` fused into `consumer`. Order matters.
    fn analyze_producer_consumer_fusion(
        &self,
        graph: &HloGraph,
        producer: NodeId,
        consumer: NodeId,
        device: &DeviceDescription,
    ) -> Option<FusionAnalysis>;
}

impl<T: FusionAnalyzer + ?Sized> FusionAnalyzer for &T {
    fn analyze_fusion(
        &self,
        graph: &HloGraph,
        node: NodeId,
        device: &DeviceDescription,
    ) -> Option<FusionAnalysis> {
        (**self).analyze_fusion(graph, node, device)
    }

    fn analyze_producer_consumer_fusion(
        &self,
        graph: &HloGraph,
        producer: NodeId,
        consumer: NodeId,
        device: &DeviceDescription,
    ) -> Option<FusionAnalysis> {
        (**self).analyze_producer_consumer_fusion(graph, producer, consumer, device)
    }
}

/// Analyzer backed by `analyze_fusion` and `analyze_producer_consumer_fusion`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFusionAnalyzer;

impl FusionAnalyzer for DefaultFusionAnalyzer {
    fn analyze_fusion(
        &self,
        graph: &HloGraph,
        node: NodeId,
        device: &DeviceDescription,
    ) -> Option<FusionAnalysis> {
        let start = Instant::now();
        let analysis = analyze_fusion(graph, node, device);
        tracing::trace!(
            node = %node,
            fusible = analysis.is_some(),
            metric = metrics::ANALYSIS_TIME_US,
            value = start.elapsed().as_micros() as u64,
            "single fusion analyzed"
        );
        analysis
    }

    fn analyze_producer_consumer_fusion(
        &self,
        graph: &HloGraph,
        producer: NodeId,
        consumer: NodeId,
        device: &DeviceDescription,
    ) -> Option<FusionAnalysis> {
        let start = Instant::now();
        let analysis = analyze_producer_consumer_fusion(graph, producer, consumer, device);
        tracing::trace!(
            producer = %producer,
            consumer = %consumer,
            fusible = analysis.is_some(),
            metric = metrics::ANALYSIS_TIME_US,
            value = start.elapsed().as_micros() as u64,
            "producer/consumer fusion analyzed"
        );
        analysis
    }
}

/// Analyze a single instruction as a fusion of its own.
///
/// `None` for stale ids and for instructions that never fuse (parameters,
/// tuples, tuple projections).
pub fn analyze_fusion(
    graph: &HloGraph,
    node: NodeId,
    device: &DeviceDescription,
) -> Option<FusionAnalysis> {
    let instr = graph.instruction(node)?;
    if !instr.opcode.is_fusible() {
        return None;
    }
    let emitter = select_emitter(instr, device);
    let (launch, shared_memory_bytes) = launch_for(graph, emitter, instr, &instr.shape, device);
    Some(FusionAnalysis {
        emitter,
        hero: node,
        root: node,
        fused: smallvec![node],
        launch,
        shared_memory_bytes,
    })
}

/// Analyze `producer` fused into its user `consumer`.
///
/// Rejected (`None`) when either id is stale or unfusible, when `consumer`
/// does not read `producer`, when both instructions are heroes, when the
/// producer is a scatter, or when a hero producer would feed anything but an
/// elementwise epilogue.
pub fn analyze_producer_consumer_fusion(
    graph: &HloGraph,
    producer: NodeId,
    consumer: NodeId,
    device: &DeviceDescription,
) -> Option<FusionAnalysis> {
    let p = graph.instruction(producer)?;
    let c = graph.instruction(consumer)?;
    if !p.opcode.is_fusible() || !c.opcode.is_fusible() {
        return None;
    }
    if !graph.is_operand_of(producer, consumer) {
        return None;
    }
    if p.opcode == Opcode::Scatter {
        return None;
    }

    let hero = match (p.opcode.is_hero(), c.opcode.is_hero()) {
        (true, true) => return None,
        (true, false) => {
            if !c.opcode.is_elementwise() {
                return None;
            }
            p
        }
        _ => c,
    };

    let emitter = select_emitter(hero, device);
    let (launch, shared_memory_bytes) = launch_for(graph, emitter, hero, &c.shape, device);
    Some(FusionAnalysis {
        emitter,
        hero: hero.id,
        root: consumer,
        fused: smallvec![producer, consumer],
        launch,
        shared_memory_bytes,
    })
}

fn select_emitter(hero: &Instruction, device: &DeviceDescription) -> EmitterKind {
    match hero.opcode {
        Opcode::Reduce => EmitterKind::Reduction,
        Opcode::Concatenate => EmitterKind::Concatenate,
        Opcode::Scatter => EmitterKind::Scatter,
        Opcode::Transpose if is_tiled_transpose(hero) => {
            if transpose_tile_bytes(&hero.shape) <= device.shared_memory_per_block {
                EmitterKind::Transpose
            } else {
                EmitterKind::Loop
            }
        }
        _ => EmitterKind::Loop,
    }
}

/// A transpose benefits from tiling only when it moves the minor dimension.
fn is_tiled_transpose(instr: &Instruction) -> bool {
    let rank = instr.shape.rank();
    rank >= 2 && instr.dimensions.last().is_some_and(|&d| d != rank - 1)
}

/// 32x33 tile; the extra column avoids shared-memory bank conflicts.
fn transpose_tile_bytes(shape: &Shape) -> u64 {
    TRANSPOSE_TILE * (TRANSPOSE_TILE + 1) * shape.element_type.byte_width()
}

fn launch_for(
    graph: &HloGraph,
    emitter: EmitterKind,
    hero: &Instruction,
    root_shape: &Shape,
    device: &DeviceDescription,
) -> (LaunchDimensions, u64) {
    match emitter {
        EmitterKind::Loop | EmitterKind::Concatenate => {
            (loop_launch(root_shape.element_count(), device), 0)
        }
        EmitterKind::Scatter => {
            // One thread per update element; updates are operand 2.
            let updates = graph
                .operands(hero.id)
                .get(2)
                .and_then(|&id| graph.instruction(id))
                .map(|u| u.shape.element_count())
                .unwrap_or_else(|| hero.shape.element_count());
            (loop_launch(updates, device), 0)
        }
        EmitterKind::Reduction => reduction_launch(graph, hero, device),
        EmitterKind::Transpose => transpose_launch(hero, device),
    }
}

fn loop_launch(elements: u64, device: &DeviceDescription) -> LaunchDimensions {
    let elements = elements.max(1);
    let threads_per_block = device
        .round_up_to_warp(elements.min(LOOP_BLOCK_THREADS))
        .min(device.threads_per_block_limit)
        .max(1);
    LaunchDimensions {
        block_count: elements.div_ceil(threads_per_block),
        threads_per_block,
    }
}

fn reduction_launch(
    graph: &HloGraph,
    reduce: &Instruction,
    device: &DeviceDescription,
) -> (LaunchDimensions, u64) {
    let input = graph
        .operands(reduce.id)
        .first()
        .and_then(|&id| graph.instruction(id))
        .map(|i| i.shape.clone())
        .unwrap_or_else(|| reduce.shape.clone());

    let reduced_extent: u64 = reduce
        .dimensions
        .iter()
        .filter_map(|&d| input.dimensions.get(d))
        .fold(1u64, |acc, &d| acc.saturating_mul(d))
        .max(1);
    let rows = (input.element_count() / reduced_extent).max(1);

    let threads_per_block = device
        .round_up_to_warp(reduced_extent.min(device.threads_per_block_limit))
        .min(device.threads_per_block_limit)
        .max(1);
    // One partial result per warp is staged in shared memory.
    let warps = threads_per_block.div_ceil(device.threads_per_warp.max(1));
    let shared_memory_bytes = warps.saturating_mul(input.element_type.byte_width());

    (
        LaunchDimensions {
            block_count: rows,
            threads_per_block,
        },
        shared_memory_bytes,
    )
}

fn transpose_launch(transpose: &Instruction, device: &DeviceDescription) -> (LaunchDimensions, u64) {
    let dims = &transpose.shape.dimensions;
    let rank = dims.len();
    let rows = dims[rank - 2];
    let cols = dims[rank - 1];
    let batch = dims[..rank - 2]
        .iter()
        .fold(1u64, |acc, &d| acc.saturating_mul(d));

    let tiles = batch
        .saturating_mul(rows.div_ceil(TRANSPOSE_TILE))
        .saturating_mul(cols.div_ceil(TRANSPOSE_TILE));
    let threads_per_block = device
        .round_up_to_warp(TRANSPOSE_TILE * TRANSPOSE_ROWS_PER_PASS)
        .min(device.threads_per_block_limit)
        .max(1);

    (
        LaunchDimensions {
            block_count: tiles.max(1),
            threads_per_block,
        },
        transpose_tile_bytes(&transpose.shape),
    )
}
