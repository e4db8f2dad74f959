//! # Execution Coordinator
//!
//! Drives each received opportunity through an explicit state machine:
//!
//! `RECEIVED -> VALIDATED -> SIMULATED -> PRICED -> NONCE_ASSIGNED ->
//!  SUBMITTED -> {CONFIRMED | REVERTED}`
//!
//! with early exits `REJECTED_PRESUBMIT` (any pre-submit stage) and
//! `ABANDONED` (expiry before submission). Each transition is a pure
//! decision plus at most one external call. Simulation gates submission
//! unconditionally; settlement deadlines derive from the opportunity's
//! expiry, never from this process's clock. Execution is serialized per
//! sender address; different senders proceed in parallel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::types::{Address, U256};
use parking_lot::Mutex as SyncMutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::advisors::{ParamAdvisor, TimingAdvisor};
use crate::blockchain::{encode_settlement, ChainStateProvider, SimulationRpc, SubmissionChannel};
use crate::config::Config;
use crate::errors::ExecutionError;
use crate::executor::{CircuitBreakerRegistry, NonceAllocator};
use crate::gas_oracle::{gas_cost_usd, price_fees, FeeQuote, WEI_PER_GWEI};
use crate::metrics;
use crate::signal::SignalConsumer;
use crate::types::{
    AttemptState, ExecutionRecord, Opportunity, Scope, SubmissionStatus, TxGasPrice,
};

pub struct ExecutionCoordinator {
    config: Arc<Config>,
    chain_state: Arc<dyn ChainStateProvider>,
    simulator: Arc<dyn SimulationRpc>,
    public_channel: Arc<dyn SubmissionChannel>,
    private_channel: Option<Arc<dyn SubmissionChannel>>,
    nonces: Arc<NonceAllocator>,
    breakers: Arc<CircuitBreakerRegistry>,
    param_advisor: Arc<dyn ParamAdvisor>,
    timing_advisor: Arc<dyn TimingAdvisor>,
    sender_locks: DashMap<(u64, Address), Arc<Mutex<()>>>,
    archive: SyncMutex<Vec<ExecutionRecord>>,
    /// When set, every archived record is also written here as JSON so
    /// unresolved submissions survive a restart.
    archive_dir: Option<PathBuf>,
}

impl ExecutionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        chain_state: Arc<dyn ChainStateProvider>,
        simulator: Arc<dyn SimulationRpc>,
        public_channel: Arc<dyn SubmissionChannel>,
        private_channel: Option<Arc<dyn SubmissionChannel>>,
        nonces: Arc<NonceAllocator>,
        breakers: Arc<CircuitBreakerRegistry>,
        param_advisor: Arc<dyn ParamAdvisor>,
        timing_advisor: Arc<dyn TimingAdvisor>,
    ) -> Self {
        Self {
            config,
            chain_state,
            simulator,
            public_channel,
            private_channel,
            nonces,
            breakers,
            param_advisor,
            timing_advisor,
            sender_locks: DashMap::new(),
            archive: SyncMutex::new(Vec::new()),
            archive_dir: None,
        }
    }

    pub fn with_archive_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.archive_dir = Some(dir.into());
        self
    }

    /// Consume signals until shutdown flips. Each opportunity is executed
    /// on its own task so a slow sender never blocks the consume loop;
    /// within a sender, attempts still serialize on the sender lock.
    pub async fn run(self: Arc<Self>, consumer: Arc<SignalConsumer>, mut shutdown: watch::Receiver<bool>) {
        info!(target: "executor", "execution coordinator started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(target: "executor", "execution coordinator stopping");
                        return;
                    }
                }
                next = consumer.recv() => {
                    match next {
                        Ok(opportunity) => {
                            let this = Arc::clone(&self);
                            tokio::spawn(async move {
                                this.execute(opportunity).await;
                            });
                        }
                        Err(e) => {
                            warn!(target: "executor", error = %e, "signal consume error");
                            tokio::time::sleep(Duration::from_millis(200)).await;
                        }
                    }
                }
            }
        }
    }

    /// Run one opportunity to a recorded outcome.
    #[instrument(skip(self, opportunity), fields(id = %opportunity.id, chain = opportunity.origin_chain_id))]
    pub async fn execute(&self, opportunity: Opportunity) -> ExecutionRecord {
        let mut record = ExecutionRecord {
            opportunity: opportunity.clone(),
            state: AttemptState::Received,
            assigned_nonce: None,
            gas: None,
            tx_ref: None,
            failure: None,
            received_at: Utc::now(),
            finished_at: None,
        };
        let state = self.drive(&opportunity, &mut record).await;
        record.state = state;
        if state.is_terminal() {
            record.finished_at = Some(Utc::now());
        }
        metrics::EXECUTIONS_TOTAL
            .with_label_values(&[&state.to_string()])
            .inc();
        if let Some(reason) = &record.failure {
            debug!(target: "executor", state = %state, reason = %reason, "attempt finished");
        } else {
            info!(target: "executor", state = %state, "attempt finished");
        }
        self.archive.lock().push(record.clone());
        self.persist(&record).await;
        record
    }

    async fn drive(&self, opportunity: &Opportunity, record: &mut ExecutionRecord) -> AttemptState {
        // -- RECEIVED: breaker gate and expiry check before any work.
        let scopes = opportunity.scopes();
        let mut gate_scopes = scopes.clone();
        gate_scopes.push(Scope::Chain(opportunity.origin_chain_id));
        if let Some(open) = self.breakers.any_open(&gate_scopes) {
            record.failure = Some(ExecutionError::BreakerOpen(open.to_string()).to_string());
            metrics::REJECTIONS_TOTAL.with_label_values(&["breaker_open"]).inc();
            return AttemptState::RejectedPreSubmit;
        }
        if opportunity.is_expired(Utc::now()) {
            record.failure = Some(ExecutionError::Expired(opportunity.id).to_string());
            return AttemptState::Abandoned;
        }

        // -- VALIDATED: structural checks plus clamped advisor parameters.
        let chain = match self.config.get_chain(opportunity.origin_chain_id) {
            Ok(c) => c.clone(),
            Err(e) => {
                record.failure = Some(e.to_string());
                metrics::REJECTIONS_TOTAL.with_label_values(&["validation"]).inc();
                return AttemptState::RejectedPreSubmit;
            }
        };
        if opportunity.loan_amount.is_zero() || opportunity.hops.is_empty() {
            record.failure =
                Some(ExecutionError::ValidationRejected("empty loan or route".into()).to_string());
            metrics::REJECTIONS_TOTAL.with_label_values(&["validation"]).inc();
            return AttemptState::RejectedPreSubmit;
        }
        let hop_ceiling = self.config.modules.executor.max_route_hops;
        if opportunity.hops.len() > hop_ceiling {
            record.failure = Some(
                ExecutionError::ValidationRejected(format!(
                    "route has {} hops, ceiling is {}",
                    opportunity.hops.len(),
                    hop_ceiling
                ))
                .to_string(),
            );
            metrics::REJECTIONS_TOTAL.with_label_values(&["validation"]).inc();
            return AttemptState::RejectedPreSubmit;
        }
        let max_slippage = self.config.modules.optimizer.max_slippage_bps;
        let suggestion = self.param_advisor.suggest_params(opportunity).await;
        let slippage_bps = suggestion
            .slippage_bps
            .unwrap_or(opportunity.slippage_budget_bps)
            .min(max_slippage);
        let min_output = effective_min_output(opportunity, slippage_bps);
        let tip_hint_gwei = suggestion
            .priority_fee_gwei
            .or(opportunity.priority_fee_hint_gwei)
            .map(|g| {
                g.min(chain.priority_fee_ceiling_gwei)
                    .min(chain.gas_hard_ceiling_gwei / 2)
            });
        let mut executed = opportunity.clone();
        executed.slippage_budget_bps = slippage_bps;
        executed.min_acceptable_output = min_output;

        // -- Per-sender serialization from here to terminal.
        let lock = self
            .sender_locks
            .entry((chain.chain_id, chain.sender))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _sender_guard = lock.lock().await;

        if let Some(delay) = self.timing_advisor.suggest_delay(&executed).await {
            let remaining = (executed.expiry - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            let capped = delay.min(remaining / 2);
            if !capped.is_zero() {
                debug!(target: "executor", delay_ms = capped.as_millis() as u64, "advisor-suggested delay");
                tokio::time::sleep(capped).await;
            }
        }
        if executed.is_expired(Utc::now()) {
            record.failure = Some(ExecutionError::Expired(executed.id).to_string());
            return AttemptState::Abandoned;
        }

        // -- SIMULATED: full settlement call against current state.
        let call = match encode_settlement(&chain, &executed) {
            Ok(c) => c,
            Err(e) => {
                record.failure = Some(e.to_string());
                metrics::REJECTIONS_TOTAL.with_label_values(&["encoding"]).inc();
                return AttemptState::RejectedPreSubmit;
            }
        };
        let sim = match self
            .with_retries(executed.expiry, || self.simulator.simulate(&call))
            .await
        {
            Ok(s) => s,
            Err(e) => {
                record.failure = Some(e.to_string());
                metrics::REJECTIONS_TOTAL.with_label_values(&["simulation"]).inc();
                self.fail_scope(&Scope::Chain(chain.chain_id));
                return AttemptState::RejectedPreSubmit;
            }
        };
        if !sim.success {
            let reason = sim.revert_reason.unwrap_or_else(|| "unknown revert".into());
            record.failure = Some(ExecutionError::SimulationReverted(reason).to_string());
            metrics::REJECTIONS_TOTAL.with_label_values(&["sim_revert"]).inc();
            for scope in &scopes {
                self.fail_scope(scope);
            }
            return AttemptState::RejectedPreSubmit;
        }
        if sim.simulated_output < executed.min_acceptable_output {
            record.failure = Some(
                ExecutionError::OutputBelowMinimum {
                    simulated: sim.simulated_output,
                    minimum: executed.min_acceptable_output,
                }
                .to_string(),
            );
            metrics::REJECTIONS_TOTAL.with_label_values(&["output_below_min"]).inc();
            return AttemptState::RejectedPreSubmit;
        }

        // -- PRICED: fee policy, re-checking profitability at the chosen fees.
        let quote = match self.price(&chain, tip_hint_gwei).await {
            Ok(q) => q,
            Err(e) => {
                record.failure = Some(e.to_string());
                metrics::REJECTIONS_TOTAL.with_label_values(&["gas"]).inc();
                return AttemptState::RejectedPreSubmit;
            }
        };
        let native_price = self
            .chain_state
            .native_usd_price(chain.chain_id)
            .await
            .unwrap_or(0.0);
        let gas_units = if sim.gas_used > 0 { sim.gas_used } else { chain.default_gas_limit };
        let cost_usd = gas_cost_usd(gas_units, &quote.gas, native_price);
        let net_after_gas = executed.expected_net_profit_usd - cost_usd;
        if net_after_gas <= 0.0 {
            // A ceiling clamp that erases profit means the trade needed fees
            // the safety policy forbids. Reject, never bypass.
            let err = if quote.clamped {
                ExecutionError::UnprofitableAtCeiling { net_usd: net_after_gas }
            } else {
                ExecutionError::ValidationRejected(format!(
                    "unprofitable after {:.2} USD gas",
                    cost_usd
                ))
            };
            record.failure = Some(err.to_string());
            metrics::REJECTIONS_TOTAL
                .with_label_values(&["unprofitable_at_fees"])
                .inc();
            return AttemptState::RejectedPreSubmit;
        }
        record.gas = Some(quote.gas);

        // -- NONCE_ASSIGNED. Allocation failure is a chain-state hiccup,
        // retried like any other transient stage failure.
        let (chain_id, sender) = (chain.chain_id, chain.sender);
        let mut nonce = match self
            .with_retries(executed.expiry, || async move {
                self.nonces
                    .allocate(chain_id, sender)
                    .await
                    .map_err(|e| ExecutionError::NonceUnavailable(e.to_string()))
            })
            .await
        {
            Ok(n) => n,
            Err(e) => {
                record.failure = Some(e.to_string());
                metrics::REJECTIONS_TOTAL.with_label_values(&["nonce"]).inc();
                return AttemptState::RejectedPreSubmit;
            }
        };
        record.assigned_nonce = Some(nonce);
        if executed.is_expired(Utc::now()) {
            self.nonces.release(chain.chain_id, chain.sender, nonce, false).await;
            record.failure = Some(ExecutionError::Expired(executed.id).to_string());
            return AttemptState::Abandoned;
        }

        // -- SUBMITTED. The expiry is re-checked around every attempt:
        // backoffs and conflict resyncs must never walk past the deadline.
        let channel = self.select_channel(&chain, &executed);
        let tx_ref = loop {
            if executed.is_expired(Utc::now()) {
                self.nonces.release(chain.chain_id, chain.sender, nonce, false).await;
                record.failure = Some(ExecutionError::Expired(executed.id).to_string());
                return AttemptState::Abandoned;
            }
            let submit_nonce = nonce;
            match self
                .with_retries(executed.expiry, || channel.submit(&call, &quote.gas, submit_nonce))
                .await
            {
                Ok(tx) => break tx,
                Err(ExecutionError::NonceConflict(conflicted)) => {
                    // Someone consumed our nonce. Resync and take a fresh
                    // one; in-flight reservations for this sender are void.
                    warn!(target: "executor", nonce = conflicted, "nonce conflict on submit, resyncing");
                    if self.nonces.resync(chain.chain_id, chain.sender).await.is_err() {
                        record.failure =
                            Some(ExecutionError::NonceConflict(conflicted).to_string());
                        return AttemptState::RejectedPreSubmit;
                    }
                    match self.nonces.allocate(chain.chain_id, chain.sender).await {
                        Ok(n) => {
                            nonce = n;
                            record.assigned_nonce = Some(n);
                        }
                        Err(e) => {
                            record.failure = Some(e.to_string());
                            return AttemptState::RejectedPreSubmit;
                        }
                    }
                }
                Err(e) => {
                    self.nonces.release(chain.chain_id, chain.sender, nonce, false).await;
                    if executed.is_expired(Utc::now()) {
                        record.failure = Some(ExecutionError::Expired(executed.id).to_string());
                        return AttemptState::Abandoned;
                    }
                    record.failure = Some(e.to_string());
                    metrics::REJECTIONS_TOTAL.with_label_values(&["submission"]).inc();
                    self.fail_scope(&Scope::Chain(chain.chain_id));
                    return AttemptState::RejectedPreSubmit;
                }
            }
        };
        record.tx_ref = Some(tx_ref.clone());
        info!(target: "executor", tx = %tx_ref, nonce, channel = channel.name(), "submitted");

        // -- Monitor to terminal.
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(self.config.modules.executor.status_timeout_secs);
        let poll = Duration::from_millis(self.config.modules.executor.status_poll_interval_ms);
        loop {
            match channel.status(&tx_ref).await {
                Ok(SubmissionStatus::Confirmed { block_number }) => {
                    self.nonces.release(chain.chain_id, chain.sender, nonce, true).await;
                    for scope in &gate_scopes {
                        self.breakers.record_success(scope);
                    }
                    metrics::PROFIT_USD_TOTAL.inc_by(net_after_gas.max(0.0));
                    info!(target: "executor", block = block_number, "confirmed");
                    return AttemptState::Confirmed;
                }
                Ok(SubmissionStatus::Reverted { reason }) => {
                    // A reverted transaction still consumed its nonce.
                    self.nonces.release(chain.chain_id, chain.sender, nonce, true).await;
                    let reason = reason.unwrap_or_else(|| "unknown".into());
                    record.failure = Some(ExecutionError::Reverted(reason).to_string());
                    for scope in &scopes {
                        self.fail_scope(scope);
                    }
                    return AttemptState::Reverted;
                }
                Ok(SubmissionStatus::Dropped) => {
                    self.nonces.release(chain.chain_id, chain.sender, nonce, false).await;
                    record.failure =
                        Some(ExecutionError::Submission("dropped from mempool".into()).to_string());
                    self.fail_scope(&Scope::Chain(chain.chain_id));
                    return AttemptState::Reverted;
                }
                Ok(SubmissionStatus::Pending) | Err(_) => {
                    if tokio::time::Instant::now() >= deadline {
                        // Unresolved: keep the nonce reserved and leave the
                        // record non-terminal for restart reconciliation.
                        record.failure =
                            Some(ExecutionError::StatusTimeout(tx_ref.to_string()).to_string());
                        warn!(target: "executor", tx = %tx_ref, "status polling timed out, attempt unresolved");
                        return AttemptState::Submitted;
                    }
                    tokio::time::sleep(poll).await;
                }
            }
        }
    }

    async fn price(
        &self,
        chain: &crate::config::PerChainConfig,
        tip_hint_gwei: Option<u64>,
    ) -> Result<FeeQuote, crate::errors::GasError> {
        let base_fee = self.chain_state.base_fee(chain.chain_id).await?;
        let mut tips = self.chain_state.recent_tips(chain.chain_id).await?;
        let window = self.config.modules.executor.tip_window;
        if tips.len() > window {
            tips.drain(..tips.len() - window);
        }
        let mut quote = price_fees(chain, base_fee, &tips)?;
        if let Some(hint) = tip_hint_gwei {
            let hint_wei = U256::from(hint) * WEI_PER_GWEI;
            if hint_wei > quote.gas.max_priority_fee_per_gas {
                // The hint may raise urgency but never break the clamps.
                let ceiling = U256::from(chain.priority_fee_ceiling_gwei) * WEI_PER_GWEI;
                let hard = U256::from(chain.gas_hard_ceiling_gwei) * WEI_PER_GWEI;
                let priority = hint_wei.min(ceiling);
                let uncapped = base_fee + priority;
                quote = FeeQuote {
                    gas: TxGasPrice {
                        max_fee_per_gas: uncapped.min(hard),
                        max_priority_fee_per_gas: priority.min(uncapped.min(hard)),
                    },
                    clamped: quote.clamped || uncapped > hard,
                };
            }
        }
        Ok(quote)
    }

    fn select_channel(
        &self,
        chain: &crate::config::PerChainConfig,
        opportunity: &Opportunity,
    ) -> Arc<dyn SubmissionChannel> {
        if let (Some(private), Some(threshold)) =
            (&self.private_channel, chain.private_channel_min_value_usd)
        {
            if opportunity.loan_amount_usd >= threshold {
                return Arc::clone(private);
            }
        }
        Arc::clone(&self.public_channel)
    }

    fn fail_scope(&self, scope: &Scope) {
        if self.breakers.record_failure(scope) {
            debug!(target: "executor", scope = %scope, "scope gated by circuit breaker");
        }
    }

    /// Bounded retries for transient stage failures. The opportunity's
    /// expiry bounds the retry budget too: once a backoff crosses it, the
    /// last error comes back instead of another attempt.
    async fn with_retries<T, F, Fut>(
        &self,
        expiry: DateTime<Utc>,
        mut op: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ExecutionError>>,
    {
        let max = self.config.modules.executor.max_stage_retries;
        let backoff = Duration::from_millis(self.config.modules.executor.retry_backoff_ms);
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < max => {
                    attempt += 1;
                    debug!(target: "executor", attempt, error = %e, "transient failure, retrying");
                    tokio::time::sleep(backoff * attempt).await;
                    if Utc::now() >= expiry {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Snapshot of every archived attempt.
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.archive.lock().clone()
    }

    async fn persist(&self, record: &ExecutionRecord) {
        let Some(dir) = &self.archive_dir else { return };
        if let Err(e) = write_record(dir, record).await {
            warn!(target: "executor", id = %record.opportunity.id, error = %e, "failed to persist attempt record");
        }
    }

    /// Merge records persisted by a previous run into the in-memory
    /// archive. Records already present (by opportunity id) win.
    async fn load_archive(&self) {
        let Some(dir) = &self.archive_dir else { return };
        let Ok(mut rd) = tokio::fs::read_dir(dir).await else { return };
        let mut loaded = Vec::new();
        while let Ok(Some(entry)) = rd.next_entry().await {
            let path = entry.path();
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            let Ok(body) = tokio::fs::read(&path).await else { continue };
            match serde_json::from_slice::<ExecutionRecord>(&body) {
                Ok(rec) => loaded.push(rec),
                Err(e) => {
                    warn!(target: "executor", file = %path.display(), error = %e, "skipping unreadable attempt record");
                }
            }
        }
        let mut archive = self.archive.lock();
        for rec in loaded {
            if !archive.iter().any(|r| r.opportunity.id == rec.opportunity.id) {
                archive.push(rec);
            }
        }
    }

    /// Resolve attempts left in `SUBMITTED` by a status timeout or restart:
    /// load anything persisted by a previous run, poll each unresolved
    /// attempt's channel once, and finalize what has settled since.
    pub async fn reconcile(&self) {
        self.load_archive().await;
        let unresolved: Vec<ExecutionRecord> = self
            .archive
            .lock()
            .iter()
            .filter(|r| r.state == AttemptState::Submitted)
            .cloned()
            .collect();
        for rec in unresolved {
            let Some(tx_ref) = rec.tx_ref.clone() else { continue };
            let Ok(chain) = self.config.get_chain(rec.opportunity.origin_chain_id) else {
                continue;
            };
            let status = self.select_channel(chain, &rec.opportunity).status(&tx_ref).await;
            let (state, consumed) = match status {
                Ok(SubmissionStatus::Confirmed { .. }) => (AttemptState::Confirmed, true),
                Ok(SubmissionStatus::Reverted { .. }) => (AttemptState::Reverted, true),
                Ok(SubmissionStatus::Dropped) => (AttemptState::Reverted, false),
                Ok(SubmissionStatus::Pending) | Err(_) => continue,
            };
            if let Some(nonce) = rec.assigned_nonce {
                self.nonces.release(chain.chain_id, chain.sender, nonce, consumed).await;
            }
            let finalized = {
                let mut archive = self.archive.lock();
                archive
                    .iter_mut()
                    .find(|r| {
                        r.opportunity.id == rec.opportunity.id && r.state == AttemptState::Submitted
                    })
                    .map(|entry| {
                        entry.state = state;
                        entry.finished_at = Some(Utc::now());
                        entry.clone()
                    })
            };
            if let Some(entry) = finalized {
                info!(target: "executor", id = %rec.opportunity.id, state = %state, "reconciled unresolved attempt");
                self.persist(&entry).await;
            }
        }
    }
}

/// Write one record atomically, keyed by opportunity id so a later
/// finalization overwrites the unresolved version.
async fn write_record(dir: &Path, record: &ExecutionRecord) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let name = format!("{}.json", record.opportunity.id);
    let tmp = dir.join(format!(".{}.tmp", name));
    let body = serde_json::to_vec_pretty(record)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, dir.join(name)).await
}

/// Re-derive the revert floor for a (possibly tightened) slippage budget.
/// The floor only ever moves up relative to the signal: a narrower budget
/// raises it, and a wider suggestion was already clamped away.
fn effective_min_output(opportunity: &Opportunity, slippage_bps: u32) -> U256 {
    let old = opportunity.slippage_budget_bps.min(9_999) as u64;
    let new = slippage_bps.min(9_999) as u64;
    if new >= old {
        return opportunity.min_acceptable_output;
    }
    opportunity.min_acceptable_output * U256::from(10_000 - new) / U256::from(10_000 - old)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn opportunity(slippage_bps: u32, min_out: u64) -> Opportunity {
        Opportunity {
            id: Uuid::new_v4(),
            origin_chain_id: 1,
            loan_asset: Address::from_low_u64_be(1),
            loan_amount: U256::from(1_000u64),
            loan_amount_usd: 1_000.0,
            expected_net_profit_usd: 20.0,
            output_rate: 1.02,
            min_acceptable_output: U256::from(min_out),
            slippage_budget_bps: slippage_bps,
            priority_fee_hint_gwei: None,
            hops: vec![],
            expiry: Utc::now() + chrono::Duration::seconds(12),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn tighter_slippage_raises_min_output() {
        let opp = opportunity(100, 990_000);
        let raised = effective_min_output(&opp, 50);
        assert!(raised > opp.min_acceptable_output);
        // 990000 * 9950 / 9900 = 995000
        assert_eq!(raised, U256::from(995_000u64));
    }

    #[test]
    fn wider_slippage_never_lowers_min_output() {
        let opp = opportunity(50, 995_000);
        assert_eq!(effective_min_output(&opp, 100), opp.min_acceptable_output);
        assert_eq!(effective_min_output(&opp, 50), opp.min_acceptable_output);
    }
}
