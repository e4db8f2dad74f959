//! # Opportunity Scheduler
//!
//! Runs discovery scan cycles: take one immutable snapshot, fan candidate
//! search out over a bounded worker pool, size survivors through the
//! optimizer, and publish what clears the profit threshold. Workers that
//! outlive the cycle's wall-clock budget simply miss the emission batch;
//! nothing is cancelled mid-path. The scan interval adapts: it snaps to the
//! minimum while opportunities are flowing and backs off toward the maximum
//! when scans come up empty or a scope's breaker is cooling.

use chrono::Utc;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::executor::CircuitBreakerRegistry;
use crate::graph::{GraphSnapshot, MarketGraph};
use crate::metrics;
use crate::optimizer::{build_opportunity, size_loan};
use crate::signal::SignalPublisher;
use crate::types::{CandidatePath, MarketEdge, MarketNode, PathHop};

pub struct OpportunityScheduler {
    config: Arc<Config>,
    graph: Arc<MarketGraph>,
    publisher: Arc<SignalPublisher>,
    breakers: Arc<CircuitBreakerRegistry>,
    workers: Arc<Semaphore>,
}

impl OpportunityScheduler {
    pub fn new(
        config: Arc<Config>,
        graph: Arc<MarketGraph>,
        publisher: Arc<SignalPublisher>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.modules.scheduler.workers.max(1)));
        Self {
            config,
            graph,
            publisher,
            breakers,
            workers,
        }
    }

    /// Scan until shutdown flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let settings = self.config.modules.scheduler.clone();
        let mut interval_secs = settings.min_scan_interval_secs;
        let mut cycle_index: u64 = 0;
        info!(target: "scheduler", workers = settings.workers, "opportunity scheduler started");
        loop {
            let emitted = self.scan_cycle(cycle_index).await;
            cycle_index += 1;
            metrics::SCAN_CYCLES.inc();
            interval_secs = if emitted > 0 {
                settings.min_scan_interval_secs
            } else {
                (interval_secs.saturating_mul(2)).min(settings.max_scan_interval_secs)
            };
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(target: "scheduler", "opportunity scheduler stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One cycle: snapshot, parallel search, size, publish. Returns the
    /// number of opportunities emitted.
    #[instrument(skip(self), fields(cycle = cycle_index))]
    pub async fn scan_cycle(&self, cycle_index: u64) -> usize {
        let settings = &self.config.modules.scheduler;
        let snapshot = self.graph.publish_snapshot();
        metrics::GRAPH_EDGES.set(snapshot.edge_count() as i64);
        if snapshot.edge_count() == 0 {
            return 0;
        }

        let mut starts: Vec<MarketNode> = snapshot.nodes().collect();
        starts.shuffle(&mut rand::thread_rng());

        let deadline = tokio::time::Instant::now() + Duration::from_millis(settings.scan_budget_ms);
        let mut tasks: JoinSet<Vec<CandidatePath>> = JoinSet::new();
        for start in starts {
            let snapshot = Arc::clone(&snapshot);
            let workers = Arc::clone(&self.workers);
            let max_hops = settings.max_hops;
            let max_paths = settings.max_paths_per_scan;
            tasks.spawn(async move {
                // Pool slot bounds concurrency; the deadline below bounds time.
                let Ok(_permit) = workers.acquire().await else {
                    return Vec::new();
                };
                search_cycles(&snapshot, start, max_hops, max_paths)
            });
        }

        let mut candidates: Vec<CandidatePath> = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(paths))) => candidates.extend(paths),
                Ok(Some(Err(e))) => warn!(target: "scheduler", error = %e, "search worker panicked"),
                Ok(None) => break,
                Err(_) => {
                    debug!(target: "scheduler", stragglers = tasks.len(), "scan budget exhausted");
                    tasks.detach_all();
                    break;
                }
            }
        }

        self.size_and_publish(&snapshot, candidates, cycle_index).await
    }

    async fn size_and_publish(
        &self,
        snapshot: &GraphSnapshot,
        candidates: Vec<CandidatePath>,
        cycle_index: u64,
    ) -> usize {
        let optimizer = &self.config.modules.optimizer;
        let ttl = self.config.modules.scheduler.opportunity_ttl_secs;
        let mut seen = HashSet::new();
        let mut emitted = 0usize;
        for path in candidates {
            if !seen.insert(path.fingerprint()) {
                continue;
            }
            if self.scope_throttled(&path, cycle_index) {
                continue;
            }
            let sized = match size_loan(snapshot, &path, optimizer) {
                Ok(Some(s)) => s,
                Ok(None) => continue,
                Err(e) => {
                    debug!(target: "scheduler", error = %e, "candidate rejected by sizing");
                    continue;
                }
            };
            metrics::OPPORTUNITIES_FOUND.inc();
            let Some(opportunity) = build_opportunity(&sized, &path, optimizer, Utc::now(), ttl)
            else {
                continue;
            };
            debug!(
                target: "scheduler",
                id = %opportunity.id,
                loan_usd = sized.loan_amount_usd,
                net_usd = sized.expected_net_profit_usd,
                hops = opportunity.hops.len(),
                "emitting opportunity"
            );
            match self.publisher.publish(opportunity).await {
                Ok(()) => {
                    metrics::OPPORTUNITIES_EMITTED.inc();
                    emitted += 1;
                }
                Err(e) => warn!(target: "scheduler", error = %e, "failed to publish opportunity"),
            }
        }
        emitted
    }

    /// Degraded scopes are scanned less often, not dropped: a path through
    /// a cooling scope only survives every `scan_interval_stretch`-th cycle.
    fn scope_throttled(&self, path: &CandidatePath, cycle_index: u64) -> bool {
        for hop in &path.hops {
            let scope = hop.edge.scope(hop.from.chain_id);
            let factor = self.breakers.scan_interval_factor(&scope);
            if factor > 1.0 && cycle_index % (factor as u64).max(2) != 0 {
                return true;
            }
        }
        false
    }
}

/// Spot rate of an edge, for search ordering only. Sizing always re-walks
/// the exact amount-dependent math.
fn spot_rate(edge: &MarketEdge) -> f64 {
    match edge {
        MarketEdge::Exchange(e) => {
            let rin = u256_approx(e.quote.reserve_in);
            let rout = u256_approx(e.quote.reserve_out);
            if rin <= 0.0 {
                return 0.0;
            }
            (rout / rin) * (1.0 - e.quote.fee_bps as f64 / 10_000.0)
        }
        MarketEdge::Bridge(b) => 1.0 - b.fee_bps as f64 / 10_000.0,
    }
}

fn u256_approx(v: ethers::types::U256) -> f64 {
    if v.bits() <= 128 {
        v.low_u128() as f64
    } else {
        f64::MAX
    }
}

/// Bounded best-first search for cycles starting and ending at `start`.
/// Neighbors are expanded highest spot rate first (equivalently, lowest
/// inverse-rate weight), and only cycles whose spot-rate product clears 1.0
/// are returned; exact profitability is the optimizer's job.
pub fn search_cycles(
    snapshot: &GraphSnapshot,
    start: MarketNode,
    max_hops: usize,
    max_paths: usize,
) -> Vec<CandidatePath> {
    let mut found = Vec::new();
    let mut stack: Vec<(MarketNode, Vec<PathHop>, f64)> = vec![(start, Vec::new(), 1.0)];

    while let Some((node, hops, rate_product)) = stack.pop() {
        if found.len() >= max_paths {
            break;
        }
        if hops.len() >= max_hops {
            continue;
        }
        let mut neighbors = snapshot.neighbors(node);
        // Ascending here: the stack pops the best-rated neighbor first.
        neighbors.sort_by(|a, b| {
            spot_rate(&a.1)
                .partial_cmp(&spot_rate(&b.1))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for (next, edge) in neighbors {
            let rate = rate_product * spot_rate(&edge);
            if rate <= 0.0 {
                continue;
            }
            let mut extended = hops.clone();
            extended.push(PathHop {
                from: node,
                to: next,
                edge,
            });
            if next == start {
                if rate > 1.0 {
                    found.push(CandidatePath {
                        hops: extended.into_iter().collect(),
                    });
                }
                continue;
            }
            // No revisiting intermediate nodes; only the start closes a cycle.
            if extended.iter().any(|h| h.from == next) {
                continue;
            }
            stack.push((next, extended, rate));
        }
    }
    found
}
