//! # Bridge Edge Refresh
//!
//! Keeps the market graph's cross-chain edges current by fanning quote
//! requests out over every configured bridge provider. Bridge edges connect
//! same-asset nodes on different chains, where "same asset" is resolved
//! through the configured equivalent-token map (USDC on Ethereum and USDC
//! on Arbitrum are distinct contract addresses). A provider that cannot
//! serve a corridor simply contributes nothing, and its previous edge ages
//! out of snapshots via the normal staleness TTL.

use ethers::types::{Address, U256};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::blockchain::BridgeQuoteProvider;
use crate::graph::MarketGraph;
use crate::types::{BridgeEdge, MarketNode};

/// Resolves a node's asset to a chain-independent identity. Built from the
/// config's `equivalent_tokens` map; assets missing from the map fall back
/// to their literal address, so they only pair across chains when the
/// address happens to match (native-style deployments).
#[derive(Debug, Default, Clone)]
pub struct TokenEquivalence {
    by_node: HashMap<(u64, Address), String>,
}

impl TokenEquivalence {
    pub fn from_config(map: &HashMap<String, HashMap<u64, Address>>) -> Self {
        let mut by_node = HashMap::new();
        for (name, per_chain) in map {
            for (&chain_id, &address) in per_chain {
                by_node.insert((chain_id, address), name.clone());
            }
        }
        Self { by_node }
    }

    fn key(&self, node: &MarketNode) -> String {
        self.by_node
            .get(&(node.chain_id, node.asset))
            .cloned()
            .unwrap_or_else(|| format!("{:?}", node.asset))
    }
}

pub struct BridgeRefresher {
    graph: Arc<MarketGraph>,
    providers: Vec<Arc<dyn BridgeQuoteProvider>>,
    equivalents: TokenEquivalence,
    /// Amount quoted when probing a corridor's fees and depth.
    probe_amount: U256,
    interval: Duration,
}

impl BridgeRefresher {
    pub fn new(
        graph: Arc<MarketGraph>,
        providers: Vec<Arc<dyn BridgeQuoteProvider>>,
        equivalents: TokenEquivalence,
        probe_amount: U256,
        interval: Duration,
    ) -> Self {
        Self {
            graph,
            providers,
            equivalents,
            probe_amount,
            interval,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(target: "bridges", providers = self.providers.len(), "bridge refresher started");
        loop {
            let refreshed = self.refresh_once().await;
            debug!(target: "bridges", refreshed, "bridge refresh pass complete");
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(target: "bridges", "bridge refresher stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over every same-asset cross-chain corridor visible in the
    /// current snapshot, pairing endpoints through the equivalence map.
    /// Returns the number of edges upserted.
    pub async fn refresh_once(&self) -> usize {
        let snapshot = self.graph.snapshot();
        let mut by_asset: HashMap<String, Vec<MarketNode>> = HashMap::new();
        for node in snapshot.nodes() {
            by_asset
                .entry(self.equivalents.key(&node))
                .or_default()
                .push(node);
        }

        let mut quotes = FuturesUnordered::new();
        for nodes in by_asset.values() {
            for &src in nodes {
                for &dst in nodes {
                    if src.chain_id == dst.chain_id {
                        continue;
                    }
                    for provider in &self.providers {
                        if !provider.supports(src.chain_id, dst.chain_id, src.asset) {
                            continue;
                        }
                        let provider = Arc::clone(provider);
                        let amount = self.probe_amount;
                        quotes.push(async move {
                            let quote = provider
                                .quote(src.chain_id, dst.chain_id, src.asset, amount)
                                .await;
                            (src, dst, provider.name().to_string(), quote)
                        });
                    }
                }
            }
        }

        let mut refreshed = 0usize;
        while let Some((src, dst, name, quote)) = quotes.next().await {
            match quote {
                Ok(q) => {
                    self.graph.upsert_bridge_edge(
                        src,
                        dst,
                        BridgeEdge {
                            bridge: name,
                            fee_bps: q.fee_bps,
                            flat_fee_usd: q.flat_fee_usd,
                            estimated_latency: q.estimated_latency,
                            solver_liquidity_cap: q.solver_liquidity_cap,
                            liquidity_usd: q.liquidity_usd,
                            last_updated: Instant::now(),
                        },
                    );
                    refreshed += 1;
                }
                Err(e) => {
                    warn!(target: "bridges", bridge = %name, src = %src, dst = %dst, error = %e, "bridge quote failed");
                }
            }
        }
        refreshed
    }
}
