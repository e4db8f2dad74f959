//! # Gas Fee Policy
//!
//! EIP-1559 fee selection: priority fee from the 75th percentile of the
//! recent-tip window clamped to a per-chain band, max fee capped by a hard
//! per-chain ceiling. The ceiling is a safety control, not an estimate — a
//! trade profitable only above it is rejected upstream, never submitted.

use ethers::types::U256;
use tracing::debug;

use crate::config::PerChainConfig;
use crate::errors::GasError;
use crate::types::TxGasPrice;

pub const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Fee pair plus whether the hard ceiling bit. Callers must re-check
/// profitability whenever `clamped` is set: the clamp changes the cost
/// basis, not the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub gas: TxGasPrice,
    pub clamped: bool,
}

/// Nearest-rank p75 over the observed tips, in wei.
fn p75(tips_wei: &[U256]) -> U256 {
    let mut sorted = tips_wei.to_vec();
    sorted.sort_unstable();
    // Nearest-rank: sorted[ceil(0.75 * n) - 1].
    let idx = (3 * sorted.len() + 3) / 4 - 1;
    sorted[idx.min(sorted.len() - 1)]
}

/// Choose fees for one submission on `chain`. `recent_tips_wei` is the
/// rolling window of observed priority fees; when empty, the chain's static
/// fallback applies (quiet chains have no recent inclusions to learn from).
pub fn price_fees(
    chain: &PerChainConfig,
    base_fee_wei: U256,
    recent_tips_wei: &[U256],
) -> Result<FeeQuote, GasError> {
    let floor = U256::from(chain.priority_fee_floor_gwei) * WEI_PER_GWEI;
    let ceiling = U256::from(chain.priority_fee_ceiling_gwei) * WEI_PER_GWEI;
    let hard_ceiling = U256::from(chain.gas_hard_ceiling_gwei) * WEI_PER_GWEI;
    if hard_ceiling.is_zero() {
        return Err(GasError::MissingCeiling(chain.chain_id));
    }

    let observed = if recent_tips_wei.is_empty() {
        match chain.static_tip_fallback_gwei {
            Some(gwei) => U256::from(gwei) * WEI_PER_GWEI,
            None => return Err(GasError::NoTipData(chain.chain_id)),
        }
    } else {
        p75(recent_tips_wei)
    };

    let priority = observed.max(floor).min(ceiling);
    let uncapped = base_fee_wei + priority;
    let clamped = uncapped > hard_ceiling;
    let max_fee = if clamped { hard_ceiling } else { uncapped };

    debug!(
        target: "gas",
        chain_id = chain.chain_id,
        base_fee = %base_fee_wei,
        priority = %priority,
        max_fee = %max_fee,
        clamped,
        "priced fees"
    );
    Ok(FeeQuote {
        gas: TxGasPrice {
            max_fee_per_gas: max_fee,
            // Priority can never exceed the max fee.
            max_priority_fee_per_gas: priority.min(max_fee),
        },
        clamped,
    })
}

/// Worst-case execution cost in USD at the quoted fees.
pub fn gas_cost_usd(gas_limit: u64, gas: &TxGasPrice, native_usd_price: f64) -> f64 {
    let cost_wei = gas.max_fee_per_gas.saturating_mul(U256::from(gas_limit));
    // Gas costs fit comfortably in f64 range.
    let cost_eth = cost_wei.low_u128() as f64 / 1e18;
    cost_eth * native_usd_price
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    fn gwei(n: u64) -> U256 {
        U256::from(n) * WEI_PER_GWEI
    }

    fn chain() -> PerChainConfig {
        PerChainConfig {
            chain_id: 1,
            settlement_contract: Address::zero(),
            loan_source: Address::zero(),
            sender: Address::zero(),
            gas_hard_ceiling_gwei: 200,
            priority_fee_floor_gwei: 1,
            priority_fee_ceiling_gwei: 50,
            static_tip_fallback_gwei: Some(2),
            private_channel_min_value_usd: None,
            default_gas_limit: 1_200_000,
        }
    }

    #[test]
    fn p75_of_window_sets_priority() {
        let tips: Vec<U256> = [1u64, 2, 3, 4, 5, 6, 7, 8].map(gwei).to_vec();
        let quote = price_fees(&chain(), gwei(20), &tips).unwrap();
        // p75 of 1..=8 gwei lands on 6 gwei.
        assert_eq!(quote.gas.max_priority_fee_per_gas, gwei(6));
        assert_eq!(quote.gas.max_fee_per_gas, gwei(26));
        assert!(!quote.clamped);
    }

    #[test]
    fn priority_clamped_to_band() {
        let spiky: Vec<U256> = [400u64, 500, 600, 700].map(gwei).to_vec();
        let quote = price_fees(&chain(), gwei(10), &spiky).unwrap();
        assert_eq!(quote.gas.max_priority_fee_per_gas, gwei(50));

        let dusty: Vec<U256> = [0u64, 0, 0].map(gwei).to_vec();
        let quote = price_fees(&chain(), gwei(10), &dusty).unwrap();
        assert_eq!(quote.gas.max_priority_fee_per_gas, gwei(1));
    }

    #[test]
    fn hard_ceiling_caps_max_fee_and_flags_clamp() {
        let tips: Vec<U256> = [30u64, 30, 30].map(gwei).to_vec();
        let quote = price_fees(&chain(), gwei(500), &tips).unwrap();
        assert!(quote.clamped);
        assert_eq!(quote.gas.max_fee_per_gas, gwei(200));
        assert!(quote.gas.max_priority_fee_per_gas <= quote.gas.max_fee_per_gas);
    }

    #[test]
    fn empty_window_uses_static_fallback() {
        let quote = price_fees(&chain(), gwei(20), &[]).unwrap();
        assert_eq!(quote.gas.max_priority_fee_per_gas, gwei(2));

        let mut no_fallback = chain();
        no_fallback.static_tip_fallback_gwei = None;
        assert!(matches!(
            price_fees(&no_fallback, gwei(20), &[]),
            Err(GasError::NoTipData(1))
        ));
    }

    #[test]
    fn gas_cost_usd_scales_with_limit() {
        let gas = TxGasPrice {
            max_fee_per_gas: gwei(100),
            max_priority_fee_per_gas: gwei(2),
        };
        let usd = gas_cost_usd(1_000_000, &gas, 3000.0);
        // 0.1 ETH at $3000.
        assert!((usd - 300.0).abs() < 1e-6);
    }
}
