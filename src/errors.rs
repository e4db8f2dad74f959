//! # Centralized Error Handling
//!
//! Hierarchical, typed error enums for the whole engine. Each component
//! returns its own error type; the binary edge wraps them in `eyre`.

use ethers::types::{Address, U256};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Missing configuration for chain {0}")]
    MissingChain(u64),
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Errors from the market graph and its snapshots.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Zero-liquidity edge on venue {0}")]
    ZeroLiquidity(String),
    #[error("Math error: {0}")]
    Math(String),
}

/// Errors from loan sizing and path evaluation.
#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Path is empty or not a cycle")]
    DegeneratePath,
    #[error("Insufficient liquidity: cap {cap_usd:.2} USD below minimum loan {min_usd:.2} USD")]
    BelowMinimumLoan { cap_usd: f64, min_usd: f64 },
    #[error("No USD price for asset {0} on chain {1}")]
    MissingPrice(Address, u64),
}

/// Errors from the signal channel: broker publishing, spool I/O, decoding.
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),
    #[error("Spool I/O error: {0}")]
    Spool(#[from] std::io::Error),
    #[error("Malformed signal envelope: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Unsupported signal schema version {0}")]
    UnsupportedVersion(u32),
}

/// Errors from the execution coordinator and its pipeline stages.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Opportunity {0} expired before submission")]
    Expired(uuid::Uuid),
    #[error("Validation rejected: {0}")]
    ValidationRejected(String),
    #[error("Simulation failed: {0}")]
    SimulationFailed(String),
    #[error("Simulation reverted: {0}")]
    SimulationReverted(String),
    #[error("Simulated output {simulated} below minimum acceptable {minimum}")]
    OutputBelowMinimum { simulated: U256, minimum: U256 },
    #[error("Unprofitable at gas ceiling: net {net_usd:.4} USD after fees")]
    UnprofitableAtCeiling { net_usd: f64 },
    #[error("Submission failed: {0}")]
    Submission(String),
    #[error("Nonce {0} already used on chain")]
    NonceConflict(u64),
    #[error("Nonce allocation failed: {0}")]
    NonceUnavailable(String),
    #[error("Transaction reverted on-chain: {0}")]
    Reverted(String),
    #[error("Status polling timed out for {0}")]
    StatusTimeout(String),
    #[error("Circuit breaker open for scope {0}")]
    BreakerOpen(String),
    #[error("Encoding failed: {0}")]
    Encoding(String),
}

/// Errors from nonce allocation.
#[derive(Error, Debug)]
pub enum NonceError {
    #[error("Chain state query failed for sender {sender}: {reason}")]
    ChainQuery { sender: Address, reason: String },
}

/// Errors from the gas fee policy.
#[derive(Error, Debug)]
pub enum GasError {
    #[error("No recent tip observations and no static fallback for chain {0}")]
    NoTipData(u64),
    #[error("Base fee unavailable for chain {0}: {1}")]
    BaseFeeUnavailable(u64, String),
    #[error("Hard gas ceiling not configured for chain {0}")]
    MissingCeiling(u64),
}

/// Errors from bridge quoting and bridge-edge refresh.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("No route from chain {src} to chain {dst} for asset {asset}")]
    NoRoute { src: u64, dst: u64, asset: Address },
    #[error("Quote provider error: {0}")]
    Provider(String),
    #[error("Quote amount {amount} exceeds solver liquidity cap {cap}")]
    ExceedsSolverCap { amount: U256, cap: U256 },
}

impl ExecutionError {
    /// Whether the coordinator may retry the failed stage with backoff.
    /// Policy rejections and reverts are final for the attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExecutionError::SimulationFailed(_)
                | ExecutionError::Submission(_)
                | ExecutionError::NonceUnavailable(_)
                | ExecutionError::StatusTimeout(_)
        )
    }
}
