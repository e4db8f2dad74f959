//! # Circuit Breaker
//!
//! Per-scope consecutive-failure gate. A scope is one venue, one bridge
//! corridor, or one chain's RPC surface; tripping a scope pauses execution
//! dequeue for that scope only and stretches its scan interval. Discovery
//! never halts, and no scope can gate another. One confirmed execution
//! clears the scope immediately, cooldown or not.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::BreakerSettings;
use crate::metrics;
use crate::types::Scope;

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

pub struct CircuitBreakerRegistry {
    threshold: u32,
    cooldown: Duration,
    scan_interval_stretch: f64,
    scopes: DashMap<Scope, Mutex<BreakerState>>,
}

impl CircuitBreakerRegistry {
    pub fn new(settings: &BreakerSettings) -> Self {
        Self::with_cooldown(settings, Duration::from_secs(settings.cooldown_secs))
    }

    pub fn with_cooldown(settings: &BreakerSettings, cooldown: Duration) -> Self {
        Self {
            threshold: settings.threshold.max(1),
            cooldown,
            scan_interval_stretch: settings.scan_interval_stretch.max(1.0),
            scopes: DashMap::new(),
        }
    }

    /// Record a countable failure. Returns true when this failure tripped
    /// (or re-armed) the breaker.
    pub fn record_failure(&self, scope: &Scope) -> bool {
        let entry = self
            .scopes
            .entry(scope.clone())
            .or_insert_with(|| Mutex::new(BreakerState::default()));
        let mut state = entry.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            let was_closed = state.open_until.is_none();
            state.open_until = Some(Instant::now() + self.cooldown);
            if was_closed {
                metrics::BREAKER_TRIPS
                    .with_label_values(&[&scope.to_string()])
                    .inc();
                warn!(
                    target: "executor::breaker",
                    scope = %scope,
                    failures = state.consecutive_failures,
                    cooldown_secs = self.cooldown.as_secs_f64(),
                    "circuit breaker tripped"
                );
            }
            true
        } else {
            false
        }
    }

    /// One confirmed execution fully clears the scope.
    pub fn record_success(&self, scope: &Scope) {
        if let Some(entry) = self.scopes.get(scope) {
            let mut state = entry.lock();
            if state.open_until.is_some() || state.consecutive_failures > 0 {
                info!(target: "executor::breaker", scope = %scope, "circuit breaker cleared on success");
            }
            *state = BreakerState::default();
        }
    }

    /// Whether execution for `scope` is currently gated. After the cooldown
    /// elapses the scope is probe-able again, but its failure count stands:
    /// the next failure re-trips immediately.
    pub fn is_open(&self, scope: &Scope) -> bool {
        match self.scopes.get(scope) {
            Some(entry) => {
                let state = entry.lock();
                state.open_until.map_or(false, |until| Instant::now() < until)
            }
            None => false,
        }
    }

    /// True when any of the opportunity's scopes is gated.
    pub fn any_open(&self, scopes: &[Scope]) -> Option<Scope> {
        scopes.iter().find(|s| self.is_open(s)).cloned()
    }

    /// Multiplier for the scheduler's scan interval over this scope:
    /// degraded scopes are scanned less often, never abandoned.
    pub fn scan_interval_factor(&self, scope: &Scope) -> f64 {
        if self.is_open(scope) {
            self.scan_interval_stretch
        } else {
            1.0
        }
    }

    pub fn consecutive_failures(&self, scope: &Scope) -> u32 {
        self.scopes
            .get(scope)
            .map(|e| e.lock().consecutive_failures)
            .unwrap_or(0)
    }
}
