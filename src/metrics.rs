// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! increment_counter {
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter,
};

use std::time::Duration;

/// Initializes the descriptions for all the metrics in the application.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_gauge!("rebalancer_up", "Node process liveness (1=up).");

    // Round pipeline
    describe_counter!(
        "rebalancer_round_steps_total",
        Unit::Count,
        "Plugin callbacks invoked, labeled by step (observation, outcome, reports, ...)."
    );
    describe_counter!(
        "rebalancer_observation_failures_total",
        Unit::Count,
        "Observations aborted, labeled by reason (chain_error, timeout)."
    );
    describe_histogram!(
        "rebalancer_observation_ms",
        "Time to build one observation in milliseconds."
    );
    describe_counter!(
        "rebalancer_invalid_observations_total",
        Unit::Count,
        "Attributed observations that failed to decode."
    );

    // Decisions
    describe_counter!(
        "rebalancer_transfers_proposed_total",
        Unit::Count,
        "Transfers produced by the rebalancing strategy, labeled by strategy."
    );
    describe_counter!(
        "rebalancer_reports_emitted_total",
        Unit::Count,
        "Reports produced, one per source network."
    );
    describe_counter!(
        "rebalancer_reports_rejected_total",
        Unit::Count,
        "Attested reports refused by ShouldAccept/ShouldTransmit, labeled by reason."
    );

    // State
    describe_gauge!(
        "rebalancer_graph_networks",
        "Networks currently in the liquidity graph."
    );
    describe_gauge!(
        "rebalancer_graph_edges",
        "Directed edges currently in the liquidity graph."
    );
    describe_gauge!(
        "rebalancer_cache_size",
        "Entries in the transfer caches, labeled by cache (pending, inflight)."
    );
    describe_counter!(
        "rebalancer_inflight_expired_total",
        Unit::Count,
        "Inflight transfers removed after being confirmed on-chain."
    );
}

pub fn set_up() {
    gauge!("rebalancer_up", 1.0);
}

pub fn record_round_step(step: &'static str) {
    counter!("rebalancer_round_steps_total", 1, "step" => step);
}

pub fn increment_observation_failures(reason: &'static str) {
    counter!("rebalancer_observation_failures_total", 1, "reason" => reason);
}

pub fn record_observation_duration(duration: Duration) {
    histogram!("rebalancer_observation_ms", duration.as_secs_f64() * 1000.0);
}

pub fn increment_invalid_observations() {
    increment_counter!("rebalancer_invalid_observations_total");
}

pub fn increment_transfers_proposed(strategy: &'static str, count: u64) {
    counter!("rebalancer_transfers_proposed_total", count, "strategy" => strategy);
}

pub fn increment_reports_emitted(count: u64) {
    counter!("rebalancer_reports_emitted_total", count);
}

pub fn increment_reports_rejected(reason: &'static str) {
    counter!("rebalancer_reports_rejected_total", 1, "reason" => reason);
}

pub fn set_graph_size(networks: usize, edges: usize) {
    gauge!("rebalancer_graph_networks", networks as f64);
    gauge!("rebalancer_graph_edges", edges as f64);
}

pub fn set_cache_size(cache_name: &'static str, size: usize) {
    gauge!("rebalancer_cache_size", size as f64, "cache" => cache_name);
}

pub fn increment_inflight_expired(count: usize) {
    counter!("rebalancer_inflight_expired_total", count as u64);
}
