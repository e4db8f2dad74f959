//! Shared harness for the integration tests: a fully scripted set of the
//! engine's external trait seams plus a small config builder. Everything
//! runs in memory; no node, no network.

#![allow(dead_code)]

use async_trait::async_trait;
use ethers::types::{Address, U256};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossarb::blockchain::{
    BridgeQuote, BridgeQuoteProvider, ChainStateProvider, SimulationRpc, SubmissionChannel,
};
use crossarb::config::{
    BreakerSettings, ChainsConfig, Config, ExecutorSettings, ModuleConfig, OptimizerSettings,
    PerChainConfig, SignalSettings,
};
use crossarb::errors::{BridgeError, ExecutionError, GasError, NonceError};
use crossarb::types::{SettlementCall, SimulationResult, SubmissionStatus, TxGasPrice, TxRef};

pub const CHAIN_ID: u64 = 31337;

pub fn gwei(n: u64) -> U256 {
    U256::from(n) * 1_000_000_000u64
}

pub fn sender() -> Address {
    Address::from_low_u64_be(0xbeef)
}

/// Config tuned for fast tests: millisecond polling, short timeouts,
/// breaker threshold of 3.
pub fn test_config() -> Arc<Config> {
    let chain = PerChainConfig {
        chain_id: CHAIN_ID,
        settlement_contract: Address::from_low_u64_be(0x5e77),
        loan_source: Address::from_low_u64_be(0x10a7),
        sender: sender(),
        gas_hard_ceiling_gwei: 200,
        priority_fee_floor_gwei: 1,
        priority_fee_ceiling_gwei: 50,
        static_tip_fallback_gwei: Some(2),
        private_channel_min_value_usd: None,
        default_gas_limit: 500_000,
    };
    let mut chains = HashMap::new();
    chains.insert("testnet".to_string(), chain);

    let mut modules = ModuleConfig::default();
    modules.optimizer = OptimizerSettings {
        min_loan_usd: 100.0,
        ..OptimizerSettings::default()
    };
    modules.executor = ExecutorSettings {
        max_stage_retries: 2,
        retry_backoff_ms: 5,
        status_poll_interval_ms: 5,
        status_timeout_secs: 1,
        ..ExecutorSettings::default()
    };
    modules.breaker = BreakerSettings {
        threshold: 3,
        cooldown_secs: 60,
        scan_interval_stretch: 4.0,
    };
    modules.signal = SignalSettings {
        spool_dir: String::new(),
        spool_retention: 100,
        spool_poll_interval_ms: 5,
        dedupe_ttl_secs: 60,
    };

    Arc::new(Config {
        log_level: "debug".into(),
        chains: ChainsConfig { chains },
        modules,
    })
}

/// Ordered record of external calls, for asserting pipeline ordering.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn record(&self, event: &str) {
        self.0.lock().push(event.to_string());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn index_of(&self, event: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == event)
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == event).count()
    }
}

pub struct MockChainState {
    pub nonce: AtomicU64,
    /// Remaining `sender_nonce` calls that fail before queries recover.
    pub nonce_failures: AtomicU64,
    pub base_fee: Mutex<U256>,
    pub tips: Mutex<Vec<U256>>,
    pub native_price: Mutex<f64>,
}

impl MockChainState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nonce: AtomicU64::new(7),
            nonce_failures: AtomicU64::new(0),
            base_fee: Mutex::new(gwei(20)),
            tips: Mutex::new(vec![gwei(2), gwei(3), gwei(4)]),
            native_price: Mutex::new(3_000.0),
        })
    }
}

#[async_trait]
impl ChainStateProvider for MockChainState {
    async fn sender_nonce(&self, _: u64, sender: Address) -> Result<u64, NonceError> {
        if self.nonce_failures.load(Ordering::SeqCst) > 0 {
            self.nonce_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(NonceError::ChainQuery {
                sender,
                reason: "rpc timeout".to_string(),
            });
        }
        Ok(self.nonce.load(Ordering::SeqCst))
    }
    async fn base_fee(&self, _: u64) -> Result<U256, GasError> {
        Ok(*self.base_fee.lock())
    }
    async fn recent_tips(&self, _: u64) -> Result<Vec<U256>, GasError> {
        Ok(self.tips.lock().clone())
    }
    async fn native_usd_price(&self, _: u64) -> Result<f64, GasError> {
        Ok(*self.native_price.lock())
    }
}

/// Simulator whose outcome is scripted per call; default is success with a
/// generous output.
pub struct ScriptedSimulator {
    pub log: EventLog,
    pub script: Mutex<VecDeque<Result<SimulationResult, ExecutionError>>>,
    pub default_output: Mutex<U256>,
}

impl ScriptedSimulator {
    pub fn ok(log: EventLog, output: U256) -> Arc<Self> {
        Arc::new(Self {
            log,
            script: Mutex::new(VecDeque::new()),
            default_output: Mutex::new(output),
        })
    }

    pub fn push(&self, result: Result<SimulationResult, ExecutionError>) {
        self.script.lock().push_back(result);
    }

    pub fn push_revert(&self, reason: &str) {
        self.push(Ok(SimulationResult {
            success: false,
            simulated_output: U256::zero(),
            revert_reason: Some(reason.to_string()),
            gas_used: 0,
        }));
    }
}

#[async_trait]
impl SimulationRpc for ScriptedSimulator {
    async fn simulate(&self, _call: &SettlementCall) -> Result<SimulationResult, ExecutionError> {
        self.log.record("simulate");
        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        Ok(SimulationResult {
            success: true,
            simulated_output: *self.default_output.lock(),
            revert_reason: None,
            gas_used: 300_000,
        })
    }
}

pub enum SubmitScript {
    Ok,
    Conflict,
    Fail(&'static str),
}

/// Submission channel with scripted submit results and status sequence.
/// Default: accept the submit, report `Confirmed` immediately.
pub struct ScriptedChannel {
    pub log: EventLog,
    counter: AtomicU64,
    pub submit_script: Mutex<VecDeque<SubmitScript>>,
    pub status_script: Mutex<VecDeque<SubmissionStatus>>,
    /// When set, reported for every status poll until cleared.
    pub sticky_status: Mutex<Option<SubmissionStatus>>,
}

impl ScriptedChannel {
    pub fn confirming(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            counter: AtomicU64::new(0),
            submit_script: Mutex::new(VecDeque::new()),
            status_script: Mutex::new(VecDeque::new()),
            sticky_status: Mutex::new(None),
        })
    }

    pub fn push_submit(&self, script: SubmitScript) {
        self.submit_script.lock().push_back(script);
    }

    pub fn push_status(&self, status: SubmissionStatus) {
        self.status_script.lock().push_back(status);
    }

    pub fn submissions(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubmissionChannel for ScriptedChannel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit(
        &self,
        _call: &SettlementCall,
        _gas: &TxGasPrice,
        nonce: u64,
    ) -> Result<TxRef, ExecutionError> {
        self.log.record("submit");
        match self.submit_script.lock().pop_front() {
            Some(SubmitScript::Conflict) => return Err(ExecutionError::NonceConflict(nonce)),
            Some(SubmitScript::Fail(msg)) => {
                return Err(ExecutionError::Submission(msg.to_string()))
            }
            Some(SubmitScript::Ok) | None => {}
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(TxRef(format!("tx-{}", n)))
    }

    async fn status(&self, _tx: &TxRef) -> Result<SubmissionStatus, ExecutionError> {
        if let Some(sticky) = self.sticky_status.lock().clone() {
            return Ok(sticky);
        }
        Ok(self
            .status_script
            .lock()
            .pop_front()
            .unwrap_or(SubmissionStatus::Confirmed { block_number: 1 }))
    }
}

/// A well-formed opportunity against the test chain: 1,000 USDC loan,
/// $25 expected net, valid for `ttl_secs` from now.
pub fn opportunity(ttl_secs: i64) -> crossarb::types::Opportunity {
    use crossarb::types::{Opportunity, SignalHop};
    Opportunity {
        id: uuid::Uuid::new_v4(),
        origin_chain_id: CHAIN_ID,
        loan_asset: Address::from_low_u64_be(0xa),
        loan_amount: U256::from(1_000_000_000u64),
        loan_amount_usd: 1_000.0,
        expected_net_profit_usd: 25.0,
        output_rate: 1.03,
        min_acceptable_output: U256::from(1_010_000_000u64),
        slippage_budget_bps: 50,
        priority_fee_hint_gwei: None,
        hops: vec![
            SignalHop {
                chain_id: CHAIN_ID,
                asset: Address::from_low_u64_be(0xb),
                channel: "cheapswap".to_string(),
            },
            SignalHop {
                chain_id: CHAIN_ID,
                asset: Address::from_low_u64_be(0xa),
                channel: "fairswap".to_string(),
            },
        ],
        expiry: chrono::Utc::now() + chrono::Duration::seconds(ttl_secs),
        created_at: chrono::Utc::now(),
    }
}

pub struct Harness {
    pub config: Arc<Config>,
    pub log: EventLog,
    pub chain_state: Arc<MockChainState>,
    pub simulator: Arc<ScriptedSimulator>,
    pub channel: Arc<ScriptedChannel>,
    pub nonces: Arc<crossarb::executor::NonceAllocator>,
    pub breakers: Arc<crossarb::executor::CircuitBreakerRegistry>,
    pub coordinator: Arc<crossarb::executor::ExecutionCoordinator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(test_config(), None)
    }

    pub fn with_config(config: Arc<Config>) -> Self {
        Self::build(config, None)
    }

    pub fn with_archive(dir: &std::path::Path) -> Self {
        Self::build(test_config(), Some(dir.to_path_buf()))
    }

    fn build(config: Arc<Config>, archive_dir: Option<std::path::PathBuf>) -> Self {
        use crossarb::advisors::NoopAdvisor;
        use crossarb::executor::{CircuitBreakerRegistry, ExecutionCoordinator, NonceAllocator};

        let log = EventLog::default();
        let chain_state = MockChainState::new();
        // Sized so a healthy simulation clears min_acceptable_output.
        let simulator = ScriptedSimulator::ok(log.clone(), U256::from(1_030_000_000u64));
        let channel = ScriptedChannel::confirming(log.clone());
        let nonces = Arc::new(NonceAllocator::new(chain_state.clone()));
        let breakers = Arc::new(CircuitBreakerRegistry::new(&config.modules.breaker));
        let mut coordinator = ExecutionCoordinator::new(
            config.clone(),
            chain_state.clone(),
            simulator.clone(),
            channel.clone(),
            None,
            nonces.clone(),
            breakers.clone(),
            Arc::new(NoopAdvisor),
            Arc::new(NoopAdvisor),
        );
        if let Some(dir) = archive_dir {
            coordinator = coordinator.with_archive_dir(dir);
        }
        let coordinator = Arc::new(coordinator);
        Self {
            config,
            log,
            chain_state,
            simulator,
            channel,
            nonces,
            breakers,
            coordinator,
        }
    }
}

/// Bridge provider with one fixed corridor and flat pricing.
pub struct StaticBridgeProvider {
    pub src: u64,
    pub dst: u64,
}

#[async_trait]
impl BridgeQuoteProvider for StaticBridgeProvider {
    fn name(&self) -> &str {
        "hopper"
    }
    fn supports(&self, src: u64, dst: u64, _asset: Address) -> bool {
        src == self.src && dst == self.dst
    }
    async fn quote(
        &self,
        _src: u64,
        _dst: u64,
        _asset: Address,
        _amount: U256,
    ) -> Result<BridgeQuote, BridgeError> {
        Ok(BridgeQuote {
            fee_bps: 4,
            flat_fee_usd: 0.25,
            estimated_latency: std::time::Duration::from_secs(20),
            solver_liquidity_cap: U256::from(u64::MAX),
            liquidity_usd: 5_000_000.0,
        })
    }
}
