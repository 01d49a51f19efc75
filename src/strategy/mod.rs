//! # Rebalancing Strategies
//!
//! A strategy turns the agreed liquidity graph plus the transfers already in flight
//! into a new set of transfers.
//!
//! ## Determinism
//!
//! Every oracle runs the strategy on its own after the Outcome is agreed, and the
//! resulting reports only reach quorum if all honest oracles produce identical
//! transfer sets. Implementations must therefore be pure functions of their
//! inputs: no wall clock, no unseeded randomness, no iteration over unordered
//! collections. The graph already hands out networks and edges in sorted order.

pub mod bidirectional_split;
pub mod greedy_max;
pub mod random;
pub mod target_min;

use std::sync::Arc;

use anyhow::Result;
use ethers::types::U256;
use serde::Deserialize;
use thiserror::Error;

use crate::graph::{GraphError, LiquidityGraph};
use crate::models::{NetworkSelector, PendingTransfer, Transfer};
use crate::settings::PluginSettings;

pub use bidirectional_split::BidirectionalSplit;
pub use greedy_max::GreedyMax;
pub use random::DeterministicRandom;
pub use target_min::TargetMin;

pub trait RebalancingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn compute_transfers_to_balance(
        &self,
        graph: &LiquidityGraph,
        pending: &[PendingTransfer],
    ) -> Result<Vec<Transfer>>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StrategyError {
    #[error("empty graph")]
    EmptyGraph,
}

/// Strategy selection as written in the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    GreedyMax,
    BidirectionalSplit,
    Random,
    TargetMin,
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::GreedyMax
    }
}

impl StrategyKind {
    pub fn build(&self, settings: &PluginSettings) -> Arc<dyn RebalancingStrategy> {
        match self {
            StrategyKind::GreedyMax => Arc::new(GreedyMax),
            StrategyKind::BidirectionalSplit => Arc::new(BidirectionalSplit),
            StrategyKind::Random => {
                Arc::new(DeterministicRandom::new(settings.random_max_transfers))
            }
            StrategyKind::TargetMin => Arc::new(settings.target_min.build()),
        }
    }
}

/// Liquidity of a network the caller obtained from the graph itself; a missing
/// vertex at this point means the graph changed under us.
pub(crate) fn liquidity_or_zero(graph: &LiquidityGraph, network: NetworkSelector) -> Result<U256> {
    match graph.get_liquidity(network) {
        Ok(liquidity) => Ok(liquidity.unwrap_or_default()),
        Err(GraphError::UnknownNetwork(n)) => Err(GraphError::InternalConsistency(format!(
            "network {} disappeared while computing transfers",
            n
        ))
        .into()),
        Err(e) => Err(e.into()),
    }
}
