//! # Core Type Definitions
//!
//! Single source of truth for the shared data structures of the engine:
//! graph nodes and edges, candidate paths, sized opportunities, the signal
//! wire schema, and execution attempt records.

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::errors::GraphError;

/// Current version of the signal wire schema. Consumers reject any other.
pub const SIGNAL_SCHEMA_VERSION: u32 = 1;

/// A vertex in the market graph: one asset on one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketNode {
    pub chain_id: u64,
    pub asset: Address,
}

impl fmt::Display for MarketNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.chain_id, self.asset)
    }
}

/// Failure-isolation scope used by the circuit breaker and the scheduler's
/// adaptive scan interval. A tripped scope never gates any other scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// A single venue (DEX) on a chain.
    Venue { chain_id: u64, venue: String },
    /// A bridge corridor identified by provider name.
    Bridge { bridge: String },
    /// RPC-level failures for a whole chain.
    Chain(u64),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Venue { chain_id, venue } => write!(f, "venue:{}:{}", chain_id, venue),
            Scope::Bridge { bridge } => write!(f, "bridge:{}", bridge),
            Scope::Chain(id) => write!(f, "chain:{}", id),
        }
    }
}

/// Directional constant-product pool state, oriented src -> dst.
#[derive(Debug, Clone, Copy)]
pub struct PoolQuote {
    pub reserve_in: U256,
    pub reserve_out: U256,
    pub fee_bps: u32,
}

/// A swap edge on a single chain.
#[derive(Debug, Clone)]
pub struct ExchangeEdge {
    pub venue: String,
    pub pool: Address,
    pub quote: PoolQuote,
    /// Pool depth in USD, used to cap loan sizing.
    pub liquidity_usd: f64,
    pub last_updated: Instant,
}

/// A cross-chain transfer edge between same-asset nodes.
#[derive(Debug, Clone)]
pub struct BridgeEdge {
    pub bridge: String,
    pub fee_bps: u32,
    pub flat_fee_usd: f64,
    pub estimated_latency: Duration,
    /// Largest transfer the bridge's solver inventory can absorb.
    pub solver_liquidity_cap: U256,
    /// Solver-side depth in USD, used to cap loan sizing alongside pools.
    pub liquidity_usd: f64,
    pub last_updated: Instant,
}

/// An edge of the market graph, oriented src -> dst.
#[derive(Debug, Clone)]
pub enum MarketEdge {
    Exchange(ExchangeEdge),
    Bridge(BridgeEdge),
}

impl MarketEdge {
    pub fn last_updated(&self) -> Instant {
        match self {
            MarketEdge::Exchange(e) => e.last_updated,
            MarketEdge::Bridge(b) => b.last_updated,
        }
    }

    pub fn liquidity_usd(&self) -> f64 {
        match self {
            MarketEdge::Exchange(e) => e.liquidity_usd,
            MarketEdge::Bridge(b) => b.liquidity_usd,
        }
    }

    /// Flat (amount-independent) USD fee charged by this edge.
    pub fn flat_fee_usd(&self) -> f64 {
        match self {
            MarketEdge::Exchange(_) => 0.0,
            MarketEdge::Bridge(b) => b.flat_fee_usd,
        }
    }

    /// Amount-dependent output for `amount_in`. Exchange edges apply full
    /// constant-product math so price impact is never linearized; bridge
    /// edges apply a proportional fee and enforce the solver cap.
    pub fn amount_out(&self, amount_in: U256) -> Result<U256, GraphError> {
        if amount_in.is_zero() {
            return Ok(U256::zero());
        }
        match self {
            MarketEdge::Exchange(e) => {
                let q = &e.quote;
                if q.reserve_in.is_zero() || q.reserve_out.is_zero() {
                    return Err(GraphError::ZeroLiquidity(e.venue.clone()));
                }
                let fee_multiplier = U256::from(10_000u64.saturating_sub(q.fee_bps as u64));
                let amount_in_with_fee = amount_in
                    .checked_mul(fee_multiplier)
                    .ok_or_else(|| GraphError::Math("fee multiply overflow".into()))?;
                let numerator = amount_in_with_fee
                    .checked_mul(q.reserve_out)
                    .ok_or_else(|| GraphError::Math("numerator overflow".into()))?;
                let denominator = q
                    .reserve_in
                    .checked_mul(U256::from(10_000u64))
                    .and_then(|v| v.checked_add(amount_in_with_fee))
                    .ok_or_else(|| GraphError::Math("denominator overflow".into()))?;
                Ok(numerator / denominator)
            }
            MarketEdge::Bridge(b) => {
                if amount_in > b.solver_liquidity_cap {
                    return Err(GraphError::ZeroLiquidity(b.bridge.clone()));
                }
                let fee_multiplier = U256::from(10_000u64.saturating_sub(b.fee_bps as u64));
                let out = amount_in
                    .checked_mul(fee_multiplier)
                    .ok_or_else(|| GraphError::Math("bridge fee overflow".into()))?
                    / U256::from(10_000u64);
                Ok(out)
            }
        }
    }

    /// Stable identity of the edge within (src, dst): venue+pool or bridge name.
    pub fn channel_key(&self) -> String {
        match self {
            MarketEdge::Exchange(e) => format!("{}:{:#x}", e.venue, e.pool),
            MarketEdge::Bridge(b) => format!("bridge:{}", b.bridge),
        }
    }

    /// Breaker scope this edge belongs to.
    pub fn scope(&self, chain_id: u64) -> Scope {
        match self {
            MarketEdge::Exchange(e) => Scope::Venue {
                chain_id,
                venue: e.venue.clone(),
            },
            MarketEdge::Bridge(b) => Scope::Bridge {
                bridge: b.bridge.clone(),
            },
        }
    }
}

/// Per-asset pricing metadata captured into each snapshot so that sizing
/// stays pure: no oracle calls once a snapshot is taken.
#[derive(Debug, Clone, Copy)]
pub struct AssetInfo {
    pub decimals: u8,
    pub usd_price: f64,
}

/// One hop of a candidate cycle: the edge plus its endpoints, with the edge
/// data cloned out of the snapshot so evaluation needs no graph access.
#[derive(Debug, Clone)]
pub struct PathHop {
    pub from: MarketNode,
    pub to: MarketNode,
    pub edge: Arc<MarketEdge>,
}

/// A candidate cycle produced by the scheduler's search. Transient:
/// meaningful only against the snapshot it was found on.
#[derive(Debug, Clone)]
pub struct CandidatePath {
    pub hops: SmallVec<[PathHop; 8]>,
}

impl CandidatePath {
    pub fn start(&self) -> Option<MarketNode> {
        self.hops.first().map(|h| h.from)
    }

    /// True when the path returns to its starting node.
    pub fn is_cycle(&self) -> bool {
        match (self.hops.first(), self.hops.last()) {
            (Some(first), Some(last)) => first.from == last.to,
            _ => false,
        }
    }

    /// Minimum liquidity across all hops, in USD. Zero for empty paths.
    pub fn min_liquidity_usd(&self) -> f64 {
        if self.hops.is_empty() {
            return 0.0;
        }
        self.hops
            .iter()
            .map(|h| h.edge.liquidity_usd())
            .fold(f64::INFINITY, f64::min)
    }

    /// Deduplication fingerprint: the ordered set of channels traversed.
    pub fn fingerprint(&self) -> String {
        let mut s = String::new();
        for hop in &self.hops {
            s.push_str(&hop.edge.channel_key());
            s.push('|');
        }
        s
    }
}

/// One hop of an opportunity as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SignalHop {
    pub chain_id: u64,
    pub asset: Address,
    /// Venue name for swaps, `bridge:<name>` for bridge legs.
    pub channel: String,
}

/// A fully sized, immutable arbitrage opportunity. Produced once by the
/// optimizer, consumed at most once by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Opportunity {
    pub id: Uuid,
    /// Chain the flash loan is taken and repaid on.
    pub origin_chain_id: u64,
    pub loan_asset: Address,
    /// Loan size in the loan asset's base units.
    #[serde(with = "u256_dec")]
    pub loan_amount: U256,
    pub loan_amount_usd: f64,
    pub expected_net_profit_usd: f64,
    /// Gross multiplier over the cycle at the chosen size (1.0 = break even
    /// before fees).
    pub output_rate: f64,
    /// Revert threshold handed to the settlement contract.
    #[serde(with = "u256_dec")]
    pub min_acceptable_output: U256,
    pub slippage_budget_bps: u32,
    pub priority_fee_hint_gwei: Option<u64>,
    pub hops: Vec<SignalHop>,
    /// Hard validity horizon. Settlement deadlines derive from this, never
    /// from the consumer's clock.
    pub expiry: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Opportunity {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    /// Scopes touched by this opportunity, for breaker gating.
    pub fn scopes(&self) -> Vec<Scope> {
        let mut scopes = Vec::with_capacity(self.hops.len());
        for hop in &self.hops {
            let scope = if let Some(bridge) = hop.channel.strip_prefix("bridge:") {
                Scope::Bridge {
                    bridge: bridge.to_string(),
                }
            } else {
                Scope::Venue {
                    chain_id: hop.chain_id,
                    venue: hop.channel.clone(),
                }
            };
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        scopes
    }
}

/// Versioned envelope for opportunity signals. Strict on unknown fields so
/// schema drift fails loudly at the boundary instead of truncating silently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SignalEnvelope {
    pub version: u32,
    pub opportunity: Opportunity,
}

impl SignalEnvelope {
    pub fn new(opportunity: Opportunity) -> Self {
        Self {
            version: SIGNAL_SCHEMA_VERSION,
            opportunity,
        }
    }
}

/// States of an execution attempt. Order below is pipeline order; the three
/// trailing variants plus `Confirmed`/`Reverted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptState {
    Received,
    Validated,
    Simulated,
    Priced,
    NonceAssigned,
    Submitted,
    Confirmed,
    Reverted,
    RejectedPreSubmit,
    Abandoned,
}

impl AttemptState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Confirmed
                | AttemptState::Reverted
                | AttemptState::RejectedPreSubmit
                | AttemptState::Abandoned
        )
    }

    /// Whether a nonce may still be held in this state.
    pub fn holds_nonce(&self) -> bool {
        matches!(
            self,
            AttemptState::NonceAssigned | AttemptState::Submitted | AttemptState::Confirmed
        )
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttemptState::Received => "RECEIVED",
            AttemptState::Validated => "VALIDATED",
            AttemptState::Simulated => "SIMULATED",
            AttemptState::Priced => "PRICED",
            AttemptState::NonceAssigned => "NONCE_ASSIGNED",
            AttemptState::Submitted => "SUBMITTED",
            AttemptState::Confirmed => "CONFIRMED",
            AttemptState::Reverted => "REVERTED",
            AttemptState::RejectedPreSubmit => "REJECTED_PRESUBMIT",
            AttemptState::Abandoned => "ABANDONED",
        };
        f.write_str(s)
    }
}

/// EIP-1559 fee pair chosen by the gas policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxGasPrice {
    #[serde(with = "u256_dec")]
    pub max_fee_per_gas: U256,
    #[serde(with = "u256_dec")]
    pub max_priority_fee_per_gas: U256,
}

/// Opaque handle returned by a submission channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxRef(pub String);

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a submitted transaction as reported by its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    Pending,
    Confirmed { block_number: u64 },
    Reverted { reason: Option<String> },
    /// Evicted from the mempool or bundle not included.
    Dropped,
}

/// Result of a pre-submission simulation of the full settlement call.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub success: bool,
    pub simulated_output: U256,
    pub revert_reason: Option<String>,
    pub gas_used: u64,
}

/// Fully encoded settlement contract invocation.
#[derive(Debug, Clone)]
pub struct SettlementCall {
    pub chain_id: u64,
    pub sender: Address,
    pub contract: Address,
    pub calldata: Bytes,
    pub gas_limit: u64,
}

/// Archived record of a finished (or restart-reconcilable) attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub opportunity: Opportunity,
    pub state: AttemptState,
    pub assigned_nonce: Option<u64>,
    pub gas: Option<TxGasPrice>,
    pub tx_ref: Option<TxRef>,
    pub failure: Option<String>,
    pub received_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Serialize U256 as a decimal string; JSON numbers cannot hold 256 bits.
mod u256_dec {
    use ethers::types::U256;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        let s = String::deserialize(d)?;
        U256::from_dec_str(&s).map_err(de::Error::custom)
    }
}
