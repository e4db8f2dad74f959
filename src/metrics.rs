//! # Global Metrics Registry
//!
//! All Prometheus metrics for the engine, registered once at first use.
//! `render()` produces the text exposition format for whatever transport
//! the deployment scrapes through.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_int_counter, register_int_counter_vec, register_int_gauge,
    Counter, Encoder, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

pub static SCAN_CYCLES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("crossarb_scan_cycles_total", "Completed discovery scan cycles")
        .unwrap()
});

pub static OPPORTUNITIES_FOUND: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "crossarb_opportunities_found_total",
        "Profitable opportunities sized by the optimizer"
    )
    .unwrap()
});

pub static OPPORTUNITIES_EMITTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "crossarb_opportunities_emitted_total",
        "Opportunities published to the signal channel"
    )
    .unwrap()
});

pub static SIGNALS_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "crossarb_signals_published_total",
        "Signals published, by transport",
        &["transport"]
    )
    .unwrap()
});

pub static SIGNALS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "crossarb_signals_rejected_total",
        "Signals dropped at the consume boundary, by reason",
        &["reason"]
    )
    .unwrap()
});

pub static EXECUTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "crossarb_executions_total",
        "Execution attempts by final state",
        &["state"]
    )
    .unwrap()
});

pub static REJECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "crossarb_rejections_total",
        "Pre-submit rejections by reason",
        &["reason"]
    )
    .unwrap()
});

pub static BREAKER_TRIPS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "crossarb_breaker_trips_total",
        "Circuit breaker trips by scope",
        &["scope"]
    )
    .unwrap()
});

pub static NONCE_RESYNCS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "crossarb_nonce_resyncs_total",
        "Full nonce resyncs after conflicts"
    )
    .unwrap()
});

pub static PROFIT_USD_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "crossarb_profit_usd_total",
        "Cumulative expected net profit of confirmed executions, USD"
    )
    .unwrap()
});

pub static GRAPH_EDGES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "crossarb_graph_edges",
        "Fresh edges in the latest published snapshot"
    )
    .unwrap()
});

/// Render every registered metric in the Prometheus text format.
pub fn render() -> String {
    let metric_families = prometheus::gather();
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&metric_families, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
