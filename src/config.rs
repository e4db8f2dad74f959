//! # Modular Configuration System
//!
//! Loads settings from a directory of specialized JSON files (`main.json`,
//! `chains.json`, `modules.json`). The `Config` struct is the single source
//! of truth for all tunables; module settings carry serde defaults so a
//! minimal config directory is enough to boot.

use ethers::types::Address;
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, time::Duration};

use crate::errors::ConfigError;

//================================================================================================//
//                                       Top-Level Config                                         //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub chains: ChainsConfig,
    #[serde(default)]
    pub modules: ModuleConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub async fn load_from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let main: MainConfig = Self::load_file(dir.join("main.json")).await?;
        let chains: ChainsConfig = Self::load_file(dir.join("chains.json")).await?;
        let modules: ModuleConfig = Self::load_optional_file(dir.join("modules.json"))
            .await?
            .unwrap_or_default();
        let cfg = Self {
            log_level: main.log_level.unwrap_or_else(default_log_level),
            chains,
            modules,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    async fn load_file<T: for<'de> Deserialize<'de>>(
        path: impl AsRef<Path>,
    ) -> std::result::Result<T, ConfigError> {
        let shown = path.as_ref().display().to_string();
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|source| ConfigError::Io { path: shown.clone(), source })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse { path: shown, source })
    }

    async fn load_optional_file<T: for<'de> Deserialize<'de>>(
        path: impl AsRef<Path>,
    ) -> std::result::Result<Option<T>, ConfigError> {
        if !path.as_ref().exists() {
            return Ok(None);
        }
        Self::load_file(path).await.map(Some)
    }

    pub fn get_chain(&self, chain_id: u64) -> std::result::Result<&PerChainConfig, ConfigError> {
        self.chains
            .chains
            .values()
            .find(|c| c.chain_id == chain_id)
            .ok_or(ConfigError::MissingChain(chain_id))
    }

    pub fn get_chain_name(&self, chain_id: u64) -> String {
        self.chains
            .chains
            .iter()
            .find(|(_, c)| c.chain_id == chain_id)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| format!("chain-{}", chain_id))
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        for (name, chain) in &self.chains.chains {
            if chain.gas_hard_ceiling_gwei == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("chains.{}.gas_hard_ceiling_gwei", name),
                    reason: "must be positive".into(),
                });
            }
            if chain.priority_fee_floor_gwei > chain.priority_fee_ceiling_gwei {
                return Err(ConfigError::InvalidValue {
                    field: format!("chains.{}.priority_fee_floor_gwei", name),
                    reason: format!(
                        "floor {} exceeds ceiling {}",
                        chain.priority_fee_floor_gwei, chain.priority_fee_ceiling_gwei
                    ),
                });
            }
        }
        let opt = &self.modules.optimizer;
        if !(0.0..=1.0).contains(&opt.max_tvl_share) {
            return Err(ConfigError::InvalidValue {
                field: "optimizer.max_tvl_share".into(),
                reason: "must be within [0, 1]".into(),
            });
        }
        if self.modules.scheduler.min_scan_interval_secs > self.modules.scheduler.max_scan_interval_secs
        {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.min_scan_interval_secs".into(),
                reason: "exceeds max_scan_interval_secs".into(),
            });
        }
        Ok(())
    }
}

//================================================================================================//
//                                        Chain Config                                            //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct MainConfig {
    log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainsConfig {
    /// Keyed by human-readable chain name ("ethereum", "arbitrum", ...).
    pub chains: HashMap<String, PerChainConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerChainConfig {
    pub chain_id: u64,
    pub settlement_contract: Address,
    /// Flash-loan source contract used in settlement calldata.
    pub loan_source: Address,
    pub sender: Address,
    /// Absolute cap on `max_fee_per_gas`. A safety control, not a market
    /// estimate: trades profitable only above it are rejected.
    pub gas_hard_ceiling_gwei: u64,
    #[serde(default = "default_priority_floor")]
    pub priority_fee_floor_gwei: u64,
    #[serde(default = "default_priority_ceiling")]
    pub priority_fee_ceiling_gwei: u64,
    /// Used when the recent-tip window is empty (quiet chains).
    #[serde(default)]
    pub static_tip_fallback_gwei: Option<u64>,
    /// Trades at or above this USD value go through the private channel.
    #[serde(default)]
    pub private_channel_min_value_usd: Option<f64>,
    #[serde(default = "default_gas_limit")]
    pub default_gas_limit: u64,
}

fn default_priority_floor() -> u64 {
    1
}
fn default_priority_ceiling() -> u64 {
    50
}
fn default_gas_limit() -> u64 {
    1_200_000
}

//================================================================================================//
//                                       Module Settings                                          //
//================================================================================================//

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ModuleConfig {
    pub graph: GraphSettings,
    pub optimizer: OptimizerSettings,
    pub scheduler: SchedulerSettings,
    pub signal: SignalSettings,
    pub executor: ExecutorSettings,
    pub breaker: BreakerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Exchange edges older than this are left out of new snapshots.
    pub exchange_edge_ttl_secs: u64,
    /// Bridge quotes decay slower than pool reserves.
    pub bridge_edge_ttl_secs: u64,
    /// Canonical asset name -> per-chain address. The same asset carries a
    /// different contract address on each chain; bridge corridors pair
    /// endpoints through this map. Unmapped assets only pair with their
    /// literal address.
    pub equivalent_tokens: HashMap<String, HashMap<u64, Address>>,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            exchange_edge_ttl_secs: 12,
            bridge_edge_ttl_secs: 60,
            equivalent_tokens: HashMap::new(),
        }
    }
}

impl GraphSettings {
    pub fn exchange_ttl(&self) -> Duration {
        Duration::from_secs(self.exchange_edge_ttl_secs)
    }
    pub fn bridge_ttl(&self) -> Duration {
        Duration::from_secs(self.bridge_edge_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    /// Smallest loan worth the fixed overhead of a flash-loan settlement.
    pub min_loan_usd: f64,
    /// Loan cap as a share of the thinnest pool on the path.
    pub max_tvl_share: f64,
    /// Binary-search iteration budget per candidate path.
    pub max_iterations: u32,
    pub min_profit_threshold_usd: f64,
    /// Hard cap on slippage budget; advisor suggestions are clamped to it.
    pub max_slippage_bps: u32,
    /// Flash-loan fee in basis points (e.g. 9 for Aave V2's 0.09%).
    pub loan_fee_bps: u32,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            min_loan_usd: 1_000.0,
            max_tvl_share: 0.20,
            max_iterations: 20,
            min_profit_threshold_usd: 1.0,
            max_slippage_bps: 100,
            loan_fee_bps: 9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub workers: usize,
    pub max_hops: usize,
    /// Per-worker cap on candidate paths examined in one cycle.
    pub max_paths_per_scan: usize,
    /// Wall-clock budget for one scan cycle; late workers miss the batch.
    pub scan_budget_ms: u64,
    pub min_scan_interval_secs: u64,
    pub max_scan_interval_secs: u64,
    /// Validity horizon stamped on emitted opportunities.
    pub opportunity_ttl_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            workers: 8,
            max_hops: 5,
            max_paths_per_scan: 200,
            scan_budget_ms: 750,
            min_scan_interval_secs: 1,
            max_scan_interval_secs: 30,
            opportunity_ttl_secs: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    /// Durable fallback queue directory, one JSON file per signal.
    pub spool_dir: String,
    /// Oldest spool files beyond this count are pruned.
    pub spool_retention: usize,
    pub spool_poll_interval_ms: u64,
    /// Idempotency window; must exceed the longest plausible expiry.
    pub dedupe_ttl_secs: u64,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            spool_dir: "signals/outgoing".to_string(),
            spool_retention: 100,
            spool_poll_interval_ms: 1_000,
            dedupe_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Bounded retries for transient failures within one stage.
    pub max_stage_retries: u32,
    pub retry_backoff_ms: u64,
    pub status_poll_interval_ms: u64,
    /// After this, a submitted attempt is recorded unresolved for restart
    /// reconciliation rather than dropped.
    pub status_timeout_secs: u64,
    /// Recent-tip window size for the p75 priority fee estimate.
    pub tip_window: usize,
    /// Signals carrying more hops than this are rejected at validation,
    /// whatever the discovery side claims.
    pub max_route_hops: usize,
    /// Directory where attempt records are persisted, one JSON file per
    /// opportunity, so unresolved submissions survive a restart.
    pub archive_dir: String,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_stage_retries: 3,
            retry_backoff_ms: 250,
            status_poll_interval_ms: 500,
            status_timeout_secs: 90,
            tip_window: 20,
            max_route_hops: 8,
            archive_dir: "signals/attempts".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive countable failures before a scope trips.
    pub threshold: u32,
    pub cooldown_secs: u64,
    /// Multiplier applied to the scan interval of a cooling scope.
    pub scan_interval_stretch: f64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: 10,
            cooldown_secs: 120,
            scan_interval_stretch: 4.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_defaults_are_sane() {
        let m = ModuleConfig::default();
        assert_eq!(m.optimizer.max_iterations, 20);
        assert!((m.optimizer.max_tvl_share - 0.20).abs() < f64::EPSILON);
        assert_eq!(m.breaker.threshold, 10);
        assert!(m.scheduler.min_scan_interval_secs <= m.scheduler.max_scan_interval_secs);
    }

    #[test]
    fn chain_config_parses_with_defaults() {
        let raw = r#"{
            "chains": {
                "testnet": {
                    "chain_id": 31337,
                    "settlement_contract": "0x0000000000000000000000000000000000000001",
                    "loan_source": "0x0000000000000000000000000000000000000002",
                    "sender": "0x0000000000000000000000000000000000000003",
                    "gas_hard_ceiling_gwei": 200
                }
            }
        }"#;
        let parsed: ChainsConfig = serde_json::from_str(raw).unwrap();
        let chain = &parsed.chains["testnet"];
        assert_eq!(chain.chain_id, 31337);
        assert_eq!(chain.priority_fee_floor_gwei, 1);
        assert_eq!(chain.default_gas_limit, 1_200_000);
        assert!(chain.static_tip_fallback_gwei.is_none());
    }
}
