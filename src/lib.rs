//! # Liquidity Rebalancer
//!
//! Node-side decision logic for keeping one fungible asset balanced across many
//! blockchains, run as an OCR3 reporting plugin by a fleet of mutually-distrusting
//! oracles.
//!
//! ## Overview
//!
//! Every round each oracle observes per-chain liquidity and the transfers already
//! pending on-chain. The observations are reduced to one agreed Outcome (median
//! liquidity, pending transfers seen by f+1 oracles), a deterministic strategy turns
//! that Outcome into transfer instructions, and one report per source chain is
//! emitted for on-chain execution.
//!
//! ## Architecture
//!
//! ### Graph Layer
//! [`graph::LiquidityGraph`] holds the networks and who can send to whom. The
//! [`discoverer`] builds it by walking liquidity manager contracts breadth-first.
//!
//! ### Decision Layer
//! [`strategy`] implementations are pure functions of the agreed state so every
//! honest oracle proposes byte-identical transfers.
//!
//! ### Round Layer
//! [`plugin::Plugin`] implements the OCR3 callbacks, using the [`transfer_cache`]
//! stores to keep the same transfer from being submitted twice.
//!
//! ### Config Layer
//! [`config_tracker::MultichainConfigTracker`] merges the `ConfigSet` events of
//! every chain into one logical OCR configuration.

// Core Types
/// Transfers, observations, outcomes and report metadata
pub mod models;
/// OCR3 callback interfaces exposed to the runtime
pub mod ocr3;

// Graph Layer
/// Thread-safe directed liquidity graph
pub mod graph;
/// Liquidity manager address per network
pub mod registry;
/// Breadth-first graph discovery
pub mod discoverer;

// Chain Access
/// Contract bindings
pub mod contracts;
/// Liquidity manager abstraction and factory
pub mod liquidity_manager;
/// Event log access per chain
pub mod log_poller;

// Decision & Round Layer
/// Rebalancing strategies
pub mod strategy;
/// Pending and inflight transfer de-duplication
pub mod transfer_cache;
/// OCR3 reporting plugin
pub mod plugin;

// Config Layer
/// Multi-chain OCR config tracking
pub mod config_tracker;
/// Background refreshed values
pub mod cached_value;

// Infrastructure
/// Configuration management
pub mod settings;
/// Metrics collection
pub mod metrics;

pub use graph::LiquidityGraph;
pub use models::{NetworkSelector, Observation, Outcome, PendingTransfer, ReportMetadata, Transfer};
pub use plugin::{Plugin, PluginFactory};
