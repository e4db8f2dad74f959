//! # Market Graph
//!
//! Directed multigraph of `(chain, asset)` nodes connected by exchange and
//! bridge edges. Writers upsert edges into a build-side table; readers only
//! ever see immutable published snapshots, so a scan cycle works on a
//! consistent view while refresh keeps writing. Staleness is soft: an edge
//! past its TTL is simply left out of the next snapshot, never an error.

mod snapshot;

pub use snapshot::GraphSnapshot;

use dashmap::DashMap;
use parking_lot::RwLock;
use petgraph::graph::DiGraph;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::GraphSettings;
use crate::types::{AssetInfo, BridgeEdge, ExchangeEdge, MarketEdge, MarketNode};

#[derive(Clone)]
struct EdgeEntry {
    from: MarketNode,
    to: MarketNode,
    edge: Arc<MarketEdge>,
}

/// The live, mutable market graph. Cheap to share: all methods take `&self`.
pub struct MarketGraph {
    settings: GraphSettings,
    /// Build-side edge table keyed by (src, dst, channel). Upserts replace
    /// in place so each venue/bridge contributes at most one edge per pair.
    edges: DashMap<(MarketNode, MarketNode, String), EdgeEntry>,
    /// Nodes are append-only; an asset once seen is never removed.
    assets: DashMap<MarketNode, AssetInfo>,
    published: RwLock<Arc<GraphSnapshot>>,
}

impl MarketGraph {
    pub fn new(settings: GraphSettings) -> Self {
        let empty = Arc::new(GraphSnapshot::new(
            DiGraph::new(),
            HashMap::new(),
            HashMap::new(),
        ));
        Self {
            settings,
            edges: DashMap::new(),
            assets: DashMap::new(),
            published: RwLock::new(empty),
        }
    }

    /// Register or refresh pricing metadata for a node's asset.
    pub fn register_asset(&self, node: MarketNode, info: AssetInfo) {
        self.assets.insert(node, info);
    }

    pub fn upsert_exchange_edge(&self, from: MarketNode, to: MarketNode, edge: ExchangeEdge) {
        debug_assert_eq!(from.chain_id, to.chain_id, "exchange edges are single-chain");
        let edge = Arc::new(MarketEdge::Exchange(edge));
        let key = (from, to, edge.channel_key());
        self.edges.insert(key, EdgeEntry { from, to, edge });
    }

    pub fn upsert_bridge_edge(&self, from: MarketNode, to: MarketNode, edge: BridgeEdge) {
        debug_assert_ne!(from.chain_id, to.chain_id, "bridge edges cross chains");
        let edge = Arc::new(MarketEdge::Bridge(edge));
        let key = (from, to, edge.channel_key());
        self.edges.insert(key, EdgeEntry { from, to, edge });
    }

    fn is_fresh(&self, edge: &MarketEdge, now: Instant) -> bool {
        let ttl = match edge {
            MarketEdge::Exchange(_) => self.settings.exchange_ttl(),
            MarketEdge::Bridge(_) => self.settings.bridge_ttl(),
        };
        now.duration_since(edge.last_updated()) <= ttl
    }

    /// Drop build-side entries past TTL. Optional housekeeping: snapshots
    /// already exclude stale edges whether or not this ran.
    pub fn evict_stale(&self, now: Instant) -> usize {
        let before = self.edges.len();
        self.edges.retain(|_, entry| self.is_fresh(&entry.edge, now));
        before - self.edges.len()
    }

    /// Build and atomically publish a new snapshot containing only fresh
    /// edges. Readers holding older snapshots are unaffected.
    pub fn publish_snapshot(&self) -> Arc<GraphSnapshot> {
        let now = Instant::now();
        let mut graph: DiGraph<MarketNode, Arc<MarketEdge>> = DiGraph::new();
        let mut node_index = HashMap::new();
        let mut stale = 0usize;

        // Every known node appears even when currently edge-less; node
        // identity is permanent while edges come and go.
        for entry in self.assets.iter() {
            let node = *entry.key();
            node_index
                .entry(node)
                .or_insert_with(|| graph.add_node(node));
        }
        for entry in self.edges.iter() {
            if !self.is_fresh(&entry.edge, now) {
                stale += 1;
                continue;
            }
            let from = *node_index
                .entry(entry.from)
                .or_insert_with(|| graph.add_node(entry.from));
            let to = *node_index
                .entry(entry.to)
                .or_insert_with(|| graph.add_node(entry.to));
            graph.add_edge(from, to, Arc::clone(&entry.edge));
        }

        let assets = self.assets.iter().map(|e| (*e.key(), *e.value())).collect();
        let snap = Arc::new(GraphSnapshot::new(graph, node_index, assets));
        debug!(
            target: "graph",
            nodes = snap.node_count(),
            edges = snap.edge_count(),
            stale_excluded = stale,
            "published market graph snapshot"
        );
        *self.published.write() = Arc::clone(&snap);
        snap
    }

    /// The most recently published snapshot. Never blocks writers.
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        Arc::clone(&self.published.read())
    }
}
