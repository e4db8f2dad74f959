//! # Statistical Advisors
//!
//! Seams for external timing/parameter models. Advisors are strictly
//! advisory: the coordinator clamps every suggestion to its hard limits and
//! no suggestion can skip simulation, raise a fee ceiling, or widen the
//! slippage budget past its cap.

use async_trait::async_trait;
use std::time::Duration;

use crate::types::Opportunity;

/// Parameter adjustments suggested for one opportunity. `None` fields mean
/// "no opinion".
#[derive(Debug, Clone, Copy, Default)]
pub struct ParamSuggestion {
    pub slippage_bps: Option<u32>,
    pub priority_fee_gwei: Option<u64>,
}

#[async_trait]
pub trait ParamAdvisor: Send + Sync {
    async fn suggest_params(&self, opportunity: &Opportunity) -> ParamSuggestion;
}

#[async_trait]
pub trait TimingAdvisor: Send + Sync {
    /// Optional submit delay, e.g. to avoid a predicted base-fee spike.
    /// The coordinator caps it well inside the opportunity's expiry.
    async fn suggest_delay(&self, opportunity: &Opportunity) -> Option<Duration>;
}

/// Default advisors: no opinion, no delay.
pub struct NoopAdvisor;

#[async_trait]
impl ParamAdvisor for NoopAdvisor {
    async fn suggest_params(&self, _: &Opportunity) -> ParamSuggestion {
        ParamSuggestion::default()
    }
}

#[async_trait]
impl TimingAdvisor for NoopAdvisor {
    async fn suggest_delay(&self, _: &Opportunity) -> Option<Duration> {
        None
    }
}
