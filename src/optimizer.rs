//! # Profit & Loan-Size Optimizer
//!
//! Pure sizing over an immutable snapshot: given a candidate cycle, find the
//! loan size maximizing net profit. No clocks, no randomness, no I/O — the
//! same snapshot and path always size identically, which keeps results
//! replayable from archived records.
//!
//! Profit at a trial size is always computed through the full amount-
//! dependent rate math of every hop. Marginal rates are never linearly
//! extrapolated: price impact is exactly why the optimum is interior.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ethers::types::U256;
use tracing::trace;
use uuid::Uuid;

use crate::config::OptimizerSettings;
use crate::errors::OptimizerError;
use crate::graph::GraphSnapshot;
use crate::types::{CandidatePath, MarketEdge, Opportunity, SignalHop};

/// Outcome of sizing: all numbers, no identity or timestamps, so the
/// function stays deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct SizedLoan {
    pub loan_amount: U256,
    pub loan_amount_usd: f64,
    pub expected_output: U256,
    pub min_acceptable_output: U256,
    pub expected_net_profit_usd: f64,
    /// Gross cycle multiplier at the chosen size.
    pub output_rate: f64,
    pub flat_fees_usd: f64,
}

/// Evaluate the cycle at one trial size. `None` means the size is
/// infeasible (overflow, bridge cap), which the search treats as
/// unboundedly bad rather than an error.
fn evaluate(path: &CandidatePath, loan_units: U256) -> Option<U256> {
    let mut amount = loan_units;
    for hop in &path.hops {
        amount = hop.edge.amount_out(amount).ok()?;
        if amount.is_zero() {
            return None;
        }
    }
    Some(amount)
}

fn usd_to_units(usd: f64, usd_per_unit: f64) -> Option<U256> {
    if usd_per_unit <= 0.0 || !usd.is_finite() {
        return None;
    }
    let units = usd / usd_per_unit;
    if units >= 2f64.powi(128) || units < 0.0 {
        return None;
    }
    Some(U256::from(units as u128))
}

fn units_to_usd(units: U256, usd_per_unit: f64) -> f64 {
    // Loses precision above 2^128 base units; loans never get there.
    let lo = units.low_u128() as f64;
    if units.bits() > 128 {
        return f64::INFINITY;
    }
    lo * usd_per_unit
}

/// Net profit at one trial size per the loan model:
/// `loan × (rate − 1) − flat_fees − loan × loan_fee_rate`.
fn net_at(
    path: &CandidatePath,
    loan_usd: f64,
    usd_per_unit: f64,
    flat_fees_usd: f64,
    loan_fee_rate: f64,
) -> Option<(f64, f64, U256, U256)> {
    let loan_units = usd_to_units(loan_usd, usd_per_unit)?;
    if loan_units.is_zero() {
        return None;
    }
    let out_units = evaluate(path, loan_units)?;
    let out_usd = units_to_usd(out_units, usd_per_unit);
    let rate = out_usd / loan_usd;
    let net = loan_usd * (rate - 1.0) - flat_fees_usd - loan_usd * loan_fee_rate;
    Some((net, rate, loan_units, out_units))
}

/// Size the loan for `path`. Returns `Ok(None)` when the best achievable
/// net profit is below threshold; errors only for structural problems.
///
/// Search: binary search on the local profit gradient over
/// `[min_loan, max_tvl_share × min liquidity]`, capped at
/// `settings.max_iterations` evaluations of the midpoint. The answer is the
/// best size actually observed, so a non-concave profit curve can cost
/// optimality but never correctness.
pub fn size_loan(
    snapshot: &GraphSnapshot,
    path: &CandidatePath,
    settings: &OptimizerSettings,
) -> Result<Option<SizedLoan>, OptimizerError> {
    if path.hops.is_empty() || !path.is_cycle() {
        return Err(OptimizerError::DegeneratePath);
    }
    let start = path.start().ok_or(OptimizerError::DegeneratePath)?;
    let usd_per_unit = snapshot
        .usd_per_unit(start)
        .ok_or(OptimizerError::MissingPrice(start.asset, start.chain_id))?;

    let cap_usd = settings.max_tvl_share * path.min_liquidity_usd();
    if cap_usd < settings.min_loan_usd {
        return Err(OptimizerError::BelowMinimumLoan {
            cap_usd,
            min_usd: settings.min_loan_usd,
        });
    }

    let flat_fees_usd: f64 = path.hops.iter().map(|h| h.edge.flat_fee_usd()).sum();
    let loan_fee_rate = settings.loan_fee_bps as f64 / 10_000.0;

    let mut best: Option<(f64, f64, f64, U256, U256)> = None;
    let mut observe = |loan_usd: f64| -> bool {
        match net_at(path, loan_usd, usd_per_unit, flat_fees_usd, loan_fee_rate) {
            Some((net, rate, loan_units, out_units)) => {
                if best.as_ref().map_or(true, |(b, ..)| net > *b) {
                    best = Some((net, loan_usd, rate, loan_units, out_units));
                }
                true
            }
            None => false,
        }
    };

    let mut lo = settings.min_loan_usd;
    let mut hi = cap_usd;
    observe(lo);
    observe(hi);
    for i in 0..settings.max_iterations {
        let mid = 0.5 * (lo + hi);
        // Gradient probe one step to the right of the midpoint.
        let step = (hi - lo).max(1.0) * 0.01;
        let at_mid = net_at(path, mid, usd_per_unit, flat_fees_usd, loan_fee_rate);
        let at_probe = net_at(path, mid + step, usd_per_unit, flat_fees_usd, loan_fee_rate);
        observe(mid);
        match (at_mid, at_probe) {
            (Some((n_mid, ..)), Some((n_probe, ..))) => {
                if n_probe > n_mid {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            // Midpoint infeasible (e.g. bridge solver cap): shrink downward.
            (None, _) | (_, None) => hi = mid,
        }
        trace!(target: "optimizer", iteration = i, lo, hi, "sizing window");
        if hi - lo < 1.0 {
            break;
        }
    }

    let Some((net, loan_usd, rate, loan_units, out_units)) = best else {
        return Ok(None);
    };
    if net < settings.min_profit_threshold_usd {
        return Ok(None);
    }

    // Revert floor: expected output scaled by the slippage budget, but never
    // below the amount that repays the loan plus its fee.
    let slip_floor = out_units * U256::from(10_000 - settings.max_slippage_bps as u64)
        / U256::from(10_000u64);
    let repay_floor =
        loan_units * U256::from(10_000 + settings.loan_fee_bps as u64) / U256::from(10_000u64);
    let min_acceptable_output = slip_floor.max(repay_floor);

    Ok(Some(SizedLoan {
        loan_amount: loan_units,
        loan_amount_usd: loan_usd,
        expected_output: out_units,
        min_acceptable_output,
        expected_net_profit_usd: net,
        output_rate: rate,
        flat_fees_usd,
    }))
}

/// Stamp identity and validity onto a sized loan. Kept apart from
/// `size_loan` so that everything clock- or identity-dependent lives here.
pub fn build_opportunity(
    sized: &SizedLoan,
    path: &CandidatePath,
    settings: &OptimizerSettings,
    now: DateTime<Utc>,
    ttl_secs: u64,
) -> Option<Opportunity> {
    let start = path.start()?;
    let hops = path
        .hops
        .iter()
        .map(|h| SignalHop {
            chain_id: h.from.chain_id,
            asset: h.to.asset,
            channel: match h.edge.as_ref() {
                MarketEdge::Exchange(e) => e.venue.clone(),
                MarketEdge::Bridge(b) => format!("bridge:{}", b.bridge),
            },
        })
        .collect();
    Some(Opportunity {
        id: Uuid::new_v4(),
        origin_chain_id: start.chain_id,
        loan_asset: start.asset,
        loan_amount: sized.loan_amount,
        loan_amount_usd: sized.loan_amount_usd,
        expected_net_profit_usd: sized.expected_net_profit_usd,
        output_rate: sized.output_rate,
        min_acceptable_output: sized.min_acceptable_output,
        slippage_budget_bps: settings.max_slippage_bps,
        priority_fee_hint_gwei: None,
        hops,
        expiry: now + ChronoDuration::seconds(ttl_secs as i64),
        created_at: now,
    })
}
