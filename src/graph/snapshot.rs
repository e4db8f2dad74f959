//! Immutable, point-in-time view of the market graph. Snapshots are
//! published behind an `Arc` and shared by every scan worker in a cycle;
//! they are never mutated after construction.

use ethers::types::Address;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::types::{AssetInfo, MarketEdge, MarketNode};

pub struct GraphSnapshot {
    graph: DiGraph<MarketNode, Arc<MarketEdge>>,
    node_index: HashMap<MarketNode, NodeIndex>,
    assets: HashMap<MarketNode, AssetInfo>,
    taken_at: Instant,
}

impl GraphSnapshot {
    pub(crate) fn new(
        graph: DiGraph<MarketNode, Arc<MarketEdge>>,
        node_index: HashMap<MarketNode, NodeIndex>,
        assets: HashMap<MarketNode, AssetInfo>,
    ) -> Self {
        Self {
            graph,
            node_index,
            assets,
            taken_at: Instant::now(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    pub fn contains(&self, node: MarketNode) -> bool {
        self.node_index.contains_key(&node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = MarketNode> + '_ {
        self.graph.node_weights().copied()
    }

    /// Outgoing fresh edges from `node`. Parallel edges (several venues over
    /// the same pair) are all reported.
    pub fn neighbors(&self, node: MarketNode) -> Vec<(MarketNode, Arc<MarketEdge>)> {
        let Some(&idx) = self.node_index.get(&node) else {
            return Vec::new();
        };
        self.graph
            .edges(idx)
            .map(|e| (self.graph[e.target()], Arc::clone(e.weight())))
            .collect()
    }

    pub fn asset_info(&self, node: MarketNode) -> Option<AssetInfo> {
        self.assets.get(&node).copied()
    }

    /// USD value of one base unit of `node`'s asset, if priced.
    pub fn usd_per_unit(&self, node: MarketNode) -> Option<f64> {
        let info = self.assets.get(&node)?;
        Some(info.usd_price / 10f64.powi(info.decimals as i32))
    }

    /// Nodes for a given asset symbol address across all chains, used to
    /// pair bridge endpoints.
    pub fn nodes_for_asset(&self, asset: Address) -> Vec<MarketNode> {
        self.node_index
            .keys()
            .filter(|n| n.asset == asset)
            .copied()
            .collect()
    }
}

impl std::fmt::Debug for GraphSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSnapshot")
            .field("nodes", &self.node_count())
            .field("edges", &self.edge_count())
            .finish()
    }
}
