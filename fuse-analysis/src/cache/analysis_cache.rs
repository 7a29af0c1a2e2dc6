//! Fusion analysis cache, memoized per node and per producer/consumer pair.
//!
//! All four maps sit behind one reader/writer lock. Hits take it shared.
//! A miss computes with no lock held, then takes it exclusive only to re-check
//! and commit, so concurrent misses on different keys never serialize on the
//! analysis itself. Two threads missing on the same key may both compute; the
//! first to commit wins and every caller gets the winner's handle.

use std::collections::hash_map::Entry;
use std::sync::Arc;

use fuse_core::config::CacheConfig;
use fuse_core::tracing::metrics;
use fuse_core::types::{DeviceDescription, FxHashMap, NodeId, SmallVec4};
use parking_lot::RwLock;
use rayon::prelude::*;

use super::stats::{CacheStats, StatsCounters};
use crate::analysis::{DefaultFusionAnalyzer, FusionAnalysis, FusionAnalyzer};
use crate::graph::HloGraph;

/// Shared handle to a stored analysis. `None` inside means "analyzed, not
/// fusible", which is distinct from "not analyzed yet".
///
/// Two handles for the same key are the same allocation (`Arc::ptr_eq`) until
/// the key is invalidated. A handle kept across `invalidate` stays readable;
/// it just stops being the cached entry.
pub type CachedAnalysis = Arc<Option<FusionAnalysis>>;

#[derive(Debug, Default)]
struct CacheState {
    analyses: FxHashMap<NodeId, CachedAnalysis>,
    producer_consumer_analyses: FxHashMap<(NodeId, NodeId), CachedAnalysis>,
    /// Reverse index: every consumer a producer was ever cached with.
    consumers_for_producers: FxHashMap<NodeId, SmallVec4<NodeId>>,
    /// Reverse index: every producer a consumer was ever cached with.
    producers_for_consumers: FxHashMap<NodeId, SmallVec4<NodeId>>,
}

impl CacheState {
    /// Pre-size all four maps for `capacity` entries each.
    fn with_capacity(capacity: usize) -> Self {
        Self {
            analyses: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            producer_consumer_analyses: FxHashMap::with_capacity_and_hasher(
                capacity,
                Default::default(),
            ),
            consumers_for_producers: FxHashMap::with_capacity_and_hasher(
                capacity,
                Default::default(),
            ),
            producers_for_consumers: FxHashMap::with_capacity_and_hasher(
                capacity,
                Default::default(),
            ),
        }
    }

    /// Drop `node`'s single entry and every pair it takes part in.
    /// Returns the number of pair entries erased.
    ///
    /// Only `node`'s own reverse-index lists are removed. When `(node, c)` is
    /// erased here, `producers_for_consumers[c]` keeps listing `node` until `c`
    /// itself is invalidated. Those leftovers only ever drive further erasures,
    /// and `producer_consumer_analyses` stays the sole source of truth for
    /// whether a pair is cached.
    fn invalidate(&mut self, node: NodeId) -> usize {
        self.analyses.remove(&node);

        let mut erased = 0;
        if let Some(consumers) = self.consumers_for_producers.remove(&node) {
            for consumer in consumers {
                if self
                    .producer_consumer_analyses
                    .remove(&(node, consumer))
                    .is_some()
                {
                    erased += 1;
                }
            }
        }
        if let Some(producers) = self.producers_for_consumers.remove(&node) {
            for producer in producers {
                if self
                    .producer_consumer_analyses
                    .remove(&(producer, node))
                    .is_some()
                {
                    erased += 1;
                }
            }
        }
        erased
    }
}

/// Memoizing front for a `FusionAnalyzer`, scoped to one device and one
/// compilation pass. Not a process-wide singleton: construct it alongside the
/// pass that owns the graph and drop it with that pass.
pub struct FusionAnalysisCache<'d, A = DefaultFusionAnalyzer> {
    device: &'d DeviceDescription,
    analyzer: A,
    state: RwLock<CacheState>,
    stats: StatsCounters,
    parallel_prefetch: bool,
}

impl<'d> FusionAnalysisCache<'d> {
    /// Cache over the default fusion analysis.
    pub fn new(device: &'d DeviceDescription) -> Self {
        Self::with_analyzer(device, DefaultFusionAnalyzer)
    }
}

impl<'d, A: FusionAnalyzer> FusionAnalysisCache<'d, A> {
    /// Cache over a custom analyzer with default cache settings.
    pub fn with_analyzer(device: &'d DeviceDescription, analyzer: A) -> Self {
        Self::with_config(device, analyzer, &CacheConfig::default())
    }

    pub fn with_config(device: &'d DeviceDescription, analyzer: A, config: &CacheConfig) -> Self {
        Self {
            device,
            analyzer,
            state: RwLock::new(CacheState::with_capacity(
                config.effective_initial_capacity(),
            )),
            stats: StatsCounters::default(),
            parallel_prefetch: config.effective_parallel_prefetch(),
        }
    }

    /// The analysis of `node` on its own, computed on first request.
    pub fn get(&self, graph: &HloGraph, node: NodeId) -> CachedAnalysis {
        {
            let state = self.state.read();
            if let Some(cached) = state.analyses.get(&node) {
                self.stats.single_hit();
                tracing::trace!(node = %node, "fusion analysis cache hit");
                return Arc::clone(cached);
            }
        }

        self.stats.single_miss();
        let analysis = Arc::new(self.analyzer.analyze_fusion(graph, node, self.device));

        let mut state = self.state.write();
        match state.analyses.entry(node) {
            Entry::Occupied(existing) => {
                // Another thread committed first; its handle may already be in use.
                self.stats.discarded();
                tracing::debug!(node = %node, "lost analysis race, discarding result");
                Arc::clone(existing.get())
            }
            Entry::Vacant(slot) => {
                tracing::debug!(node = %node, fusible = analysis.is_some(), "fusion analysis cached");
                Arc::clone(slot.insert(analysis))
            }
        }
    }

    /// The analysis of `producer` fused into `consumer`, computed on first
    /// request. `(a, b)` and `(b, a)` are unrelated entries.
    pub fn get_pair(&self, graph: &HloGraph, producer: NodeId, consumer: NodeId) -> CachedAnalysis {
        let key = (producer, consumer);
        {
            let state = self.state.read();
            if let Some(cached) = state.producer_consumer_analyses.get(&key) {
                self.stats.pair_hit();
                tracing::trace!(producer = %producer, consumer = %consumer, "fusion analysis cache hit");
                return Arc::clone(cached);
            }
        }

        self.stats.pair_miss();
        let analysis = Arc::new(self.analyzer.analyze_producer_consumer_fusion(
            graph,
            producer,
            consumer,
            self.device,
        ));

        let mut guard = self.state.write();
        let state = &mut *guard;
        match state.producer_consumer_analyses.entry(key) {
            Entry::Occupied(existing) => {
                self.stats.discarded();
                tracing::debug!(
                    producer = %producer,
                    consumer = %consumer,
                    "lost analysis race, discarding result"
                );
                Arc::clone(existing.get())
            }
            Entry::Vacant(slot) => {
                let stored = Arc::clone(slot.insert(analysis));
                // Lists may still hold a stale entry from an earlier
                // one-sided invalidation; keep each id listed once.
                let consumers = state.consumers_for_producers.entry(producer).or_default();
                if !consumers.contains(&consumer) {
                    consumers.push(consumer);
                }
                let producers = state.producers_for_consumers.entry(consumer).or_default();
                if !producers.contains(&producer) {
                    producers.push(producer);
                }
                tracing::debug!(
                    producer = %producer,
                    consumer = %consumer,
                    fusible = stored.is_some(),
                    "producer/consumer analysis cached"
                );
                stored
            }
        }
    }

    /// Forget `node`: its own analysis and every pair analysis it appears in,
    /// as producer or as consumer. No-op for ids never queried.
    pub fn invalidate(&self, node: NodeId) {
        let erased = self.state.write().invalidate(node);
        self.stats.invalidated(1);
        tracing::debug!(
            node = %node,
            metric = metrics::INVALIDATED_PAIRS,
            value = erased,
            "fusion analysis invalidated"
        );
    }

    /// Invalidate several nodes under a single lock acquisition.
    pub fn invalidate_all(&self, nodes: impl IntoIterator<Item = NodeId>) {
        let mut state = self.state.write();
        let mut count = 0;
        let mut erased = 0;
        for node in nodes {
            erased += state.invalidate(node);
            count += 1;
        }
        drop(state);
        self.stats.invalidated(count);
        tracing::debug!(
            nodes = count,
            metric = metrics::INVALIDATED_PAIRS,
            value = erased,
            "fusion analyses invalidated"
        );
    }

    /// Warm the single-node entries for `nodes`.
    pub fn prefetch(&self, graph: &HloGraph, nodes: &[NodeId]) {
        if self.parallel_prefetch {
            nodes.par_iter().for_each(|&node| {
                self.get(graph, node);
            });
        } else {
            for &node in nodes {
                self.get(graph, node);
            }
        }
        tracing::debug!(metric = metrics::PREFETCH_KEYS, value = nodes.len(), "prefetched single analyses");
    }

    /// Warm the pair entries for `pairs`.
    pub fn prefetch_pairs(&self, graph: &HloGraph, pairs: &[(NodeId, NodeId)]) {
        if self.parallel_prefetch {
            pairs.par_iter().for_each(|&(producer, consumer)| {
                self.get_pair(graph, producer, consumer);
            });
        } else {
            for &(producer, consumer) in pairs {
                self.get_pair(graph, producer, consumer);
            }
        }
        tracing::debug!(metric = metrics::PREFETCH_KEYS, value = pairs.len(), "prefetched pair analyses");
    }

    pub fn analyzer(&self) -> &A {
        &self.analyzer
    }
}

impl<'d, A> FusionAnalysisCache<'d, A> {
    pub fn device(&self) -> &'d DeviceDescription {
        self.device
    }

    /// Whether `node` has a cached single analysis.
    pub fn contains(&self, node: NodeId) -> bool {
        self.state.read().analyses.contains_key(&node)
    }

    /// Whether `(producer, consumer)` has a cached pair analysis.
    pub fn contains_pair(&self, producer: NodeId, consumer: NodeId) -> bool {
        self.state
            .read()
            .producer_consumer_analyses
            .contains_key(&(producer, consumer))
    }

    /// Consumers the reverse index lists for `producer`. May include pairs
    /// already erased through the consumer side.
    pub fn indexed_consumers(&self, producer: NodeId) -> Vec<NodeId> {
        self.state
            .read()
            .consumers_for_producers
            .get(&producer)
            .map(|v| v.to_vec())
            .unwrap_or_default()
    }

    /// Producers the reverse index lists for `consumer`. May include pairs
    /// already erased through the producer side.
    pub fn indexed_producers(&self, consumer: NodeId) -> Vec<NodeId> {
        self.state
            .read()
            .producers_for_consumers
            .get(&consumer)
            .map(|v| v.to_vec())
            .unwrap_or_default()
    }

    /// Number of cached single-node analyses.
    pub fn len(&self) -> usize {
        self.state.read().analyses.len()
    }

    /// Number of cached pair analyses.
    pub fn pair_len(&self) -> usize {
        self.state.read().producer_consumer_analyses.len()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.state.read();
        state.analyses.is_empty() && state.producer_consumer_analyses.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

impl<A> Drop for FusionAnalysisCache<'_, A> {
    fn drop(&mut self) {
        let stats = self.stats.snapshot();
        let state = self.state.get_mut();
        tracing::debug!(
            device = %self.device.name,
            singles = state.analyses.len(),
            pairs = state.producer_consumer_analyses.len(),
            metric = metrics::CACHE_HIT_RATE,
            value = stats.hit_rate(),
            "fusion analysis cache dropped"
        );
    }
}

impl<A> std::fmt::Debug for FusionAnalysisCache<'_, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("FusionAnalysisCache")
            .field("device", &self.device.name)
            .field("singles", &state.analyses.len())
            .field("pairs", &state.producer_consumer_analyses.len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
