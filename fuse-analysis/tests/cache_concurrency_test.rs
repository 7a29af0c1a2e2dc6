//! Fusion analysis cache under concurrent access.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use fuse_analysis::analysis::{
    DefaultFusionAnalyzer, EmitterKind, FusionAnalysis, FusionAnalyzer, LaunchDimensions,
};
use fuse_analysis::cache::{CachedAnalysis, FusionAnalysisCache};
use fuse_analysis::graph::{HloGraph, InstructionSpec, Opcode, PrimitiveType, Shape};
use fuse_core::types::{DeviceDescription, NodeId};
use smallvec::smallvec;

// ═══════════════════════════════════════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════════════════════════════════════

/// Holds every caller at a barrier so `parties` threads are all mid-analysis
/// at once. Each result carries its invocation number in `block_count`.
struct RendezvousAnalyzer {
    barrier: Barrier,
    calls: AtomicU64,
}

impl RendezvousAnalyzer {
    fn new(parties: usize) -> Self {
        Self {
            barrier: Barrier::new(parties),
            calls: AtomicU64::new(0),
        }
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn tagged(&self, hero: NodeId, root: NodeId) -> Option<FusionAnalysis> {
        let invocation = self.calls.fetch_add(1, Ordering::SeqCst);
        self.barrier.wait();
        Some(FusionAnalysis {
            emitter: EmitterKind::Loop,
            hero,
            root,
            fused: smallvec![hero],
            launch: LaunchDimensions {
                block_count: invocation,
                threads_per_block: 32,
            },
            shared_memory_bytes: 0,
        })
    }
}

impl FusionAnalyzer for RendezvousAnalyzer {
    fn analyze_fusion(
        &self,
        _graph: &HloGraph,
        node: NodeId,
        _device: &DeviceDescription,
    ) -> Option<FusionAnalysis> {
        self.tagged(node, node)
    }

    fn analyze_producer_consumer_fusion(
        &self,
        _graph: &HloGraph,
        producer: NodeId,
        consumer: NodeId,
        _device: &DeviceDescription,
    ) -> Option<FusionAnalysis> {
        self.tagged(producer, consumer)
    }
}

#[derive(Default)]
struct CountingAnalyzer {
    calls: AtomicUsize,
}

impl FusionAnalyzer for CountingAnalyzer {
    fn analyze_fusion(
        &self,
        graph: &HloGraph,
        node: NodeId,
        device: &DeviceDescription,
    ) -> Option<FusionAnalysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        DefaultFusionAnalyzer.analyze_fusion(graph, node, device)
    }

    fn analyze_producer_consumer_fusion(
        &self,
        graph: &HloGraph,
        producer: NodeId,
        consumer: NodeId,
        device: &DeviceDescription,
    ) -> Option<FusionAnalysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        DefaultFusionAnalyzer.analyze_producer_consumer_fusion(graph, producer, consumer, device)
    }
}

/// A parameter feeding `width` independent elementwise chains of length 3.
fn fan_out(width: usize) -> (HloGraph, Vec<NodeId>) {
    let mut graph = HloGraph::new();
    let shape = Shape::new(PrimitiveType::F32, vec![4096]);
    let param = graph
        .add_instruction(InstructionSpec::new("p0", Opcode::Parameter, shape.clone()))
        .unwrap();
    let mut nodes = vec![param];
    for i in 0..width {
        let mut prev = param;
        for (step, opcode) in [Opcode::Exp, Opcode::Negate, Opcode::Convert].into_iter().enumerate() {
            prev = graph
                .add_instruction(
                    InstructionSpec::new(format!("n{i}_{step}"), opcode, shape.clone())
                        .with_operands([prev]),
                )
                .unwrap();
            nodes.push(prev);
        }
    }
    (graph, nodes)
}

// ═══════════════════════════════════════════════════════════════════════════
// RACES ON ONE KEY
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn racing_single_misses_converge_on_first_commit() {
    let graph = HloGraph::new();
    let device = DeviceDescription::default();
    let analyzer = RendezvousAnalyzer::new(2);
    let cache = FusionAnalysisCache::with_analyzer(&device, &analyzer);
    let node = NodeId::from_raw(7);

    let (a, b) = thread::scope(|s| {
        let first = s.spawn(|| cache.get(&graph, node));
        let second = s.spawn(|| cache.get(&graph, node));
        (first.join().unwrap(), second.join().unwrap())
    });

    // Both threads computed, one result won.
    assert_eq!(analyzer.calls(), 2);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.stats().discarded, 1);
    assert_eq!(cache.stats().single_misses, 2);

    let later = cache.get(&graph, node);
    assert!(Arc::ptr_eq(&a, &later));
    assert_eq!(analyzer.calls(), 2);
}

#[test]
fn racing_pair_misses_index_the_pair_once() {
    let graph = HloGraph::new();
    let device = DeviceDescription::default();
    let analyzer = RendezvousAnalyzer::new(2);
    let cache = FusionAnalysisCache::with_analyzer(&device, &analyzer);
    let producer = NodeId::from_raw(1);
    let consumer = NodeId::from_raw(2);

    let (a, b) = thread::scope(|s| {
        let first = s.spawn(|| cache.get_pair(&graph, producer, consumer));
        let second = s.spawn(|| cache.get_pair(&graph, producer, consumer));
        (first.join().unwrap(), second.join().unwrap())
    });

    assert_eq!(analyzer.calls(), 2);
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.stats().discarded, 1);
    assert_eq!(cache.indexed_consumers(producer), vec![consumer]);
    assert_eq!(cache.indexed_producers(consumer), vec![producer]);

    cache.invalidate(producer);
    assert!(!cache.contains_pair(producer, consumer));
}

// ═══════════════════════════════════════════════════════════════════════════
// MANY THREADS, MANY KEYS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn all_threads_observe_one_handle_per_key() {
    let (graph, nodes) = fan_out(8);
    let pairs = graph.producer_consumer_pairs();
    let device = DeviceDescription::default();
    let analyzer = CountingAnalyzer::default();
    let cache = FusionAnalysisCache::with_analyzer(&device, &analyzer);

    let seen: Vec<(Vec<CachedAnalysis>, Vec<CachedAnalysis>)> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let (graph, nodes, pairs, cache) = (&graph, &nodes, &pairs, &cache);
                s.spawn(move || {
                    // Stagger the start point so threads collide on different keys.
                    let mut singles: Vec<(NodeId, CachedAnalysis)> = nodes
                        .iter()
                        .cycle()
                        .skip(t)
                        .take(nodes.len())
                        .map(|&n| (n, cache.get(graph, n)))
                        .collect();
                    singles.sort_by_key(|(n, _)| *n);
                    let pair_handles: Vec<CachedAnalysis> = pairs
                        .iter()
                        .map(|&(p, c)| cache.get_pair(graph, p, c))
                        .collect();
                    let singles: Vec<CachedAnalysis> =
                        singles.into_iter().map(|(_, h)| h).collect();
                    (singles, pair_handles)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut sorted_nodes = nodes.clone();
    sorted_nodes.sort();
    for (singles, pair_handles) in &seen {
        for (node, handle) in sorted_nodes.iter().zip(singles) {
            assert!(Arc::ptr_eq(handle, &cache.get(&graph, *node)));
        }
        for (&(p, c), handle) in pairs.iter().zip(pair_handles) {
            assert!(Arc::ptr_eq(handle, &cache.get_pair(&graph, p, c)));
        }
    }

    assert_eq!(cache.len(), nodes.len());
    assert_eq!(cache.pair_len(), pairs.len());
    let stats = cache.stats();
    let computed = (nodes.len() + pairs.len()) as u64;
    assert_eq!(analyzer.calls.load(Ordering::SeqCst) as u64, stats.misses());
    assert_eq!(stats.misses() - stats.discarded, computed);
}

#[test]
fn parallel_prefetch_then_everything_hits() {
    let (graph, nodes) = fan_out(16);
    let pairs = graph.producer_consumer_pairs();
    let device = DeviceDescription::default();
    let cache = FusionAnalysisCache::new(&device);

    cache.prefetch(&graph, &nodes);
    cache.prefetch_pairs(&graph, &pairs);
    let warmed = cache.stats();
    assert_eq!(warmed.single_misses, nodes.len() as u64);
    assert_eq!(warmed.pair_misses, pairs.len() as u64);

    for &node in &nodes {
        cache.get(&graph, node);
    }
    for &(p, c) in &pairs {
        cache.get_pair(&graph, p, c);
    }
    let after = cache.stats();
    assert_eq!(after.misses(), warmed.misses());
    assert_eq!(after.hits(), warmed.hits() + (nodes.len() + pairs.len()) as u64);
}

#[test]
fn concurrent_invalidation_and_lookup_stay_consistent() {
    let (graph, nodes) = fan_out(4);
    let pairs = graph.producer_consumer_pairs();
    let device = DeviceDescription::default();
    let cache = FusionAnalysisCache::new(&device);

    thread::scope(|s| {
        for t in 0..4 {
            let (graph, nodes, pairs, cache) = (&graph, &nodes, &pairs, &cache);
            s.spawn(move || {
                for round in 0..50 {
                    for &(p, c) in pairs {
                        cache.get_pair(graph, p, c);
                    }
                    let victim = nodes[(t * 7 + round) % nodes.len()];
                    cache.invalidate(victim);
                    cache.get(graph, victim);
                }
            });
        }
    });

    // Whatever survived must still be reachable through the reverse index.
    for &(p, c) in &pairs {
        if cache.contains_pair(p, c) {
            assert!(cache.indexed_consumers(p).contains(&c));
            assert!(cache.indexed_producers(c).contains(&p));
        }
    }

    cache.invalidate_all(nodes.iter().copied());
    assert!(cache.is_empty());
}
