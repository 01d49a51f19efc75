use anyhow::Result;
use ethers::types::U256;

use crate::graph::LiquidityGraph;
use crate::models::{NetworkSelector, PendingTransfer, Transfer};
use crate::strategy::{liquidity_or_zero, RebalancingStrategy, StrategyError};

/// Sends every network's full balance to the network holding the most liquidity.
///
/// Ties go to the lowest selector. Networks with zero liquidity send nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyMax;

impl RebalancingStrategy for GreedyMax {
    fn name(&self) -> &'static str {
        "greedy_max"
    }

    fn compute_transfers_to_balance(
        &self,
        graph: &LiquidityGraph,
        _pending: &[PendingTransfer],
    ) -> Result<Vec<Transfer>> {
        let networks = graph.networks();
        if networks.is_empty() {
            return Err(StrategyError::EmptyGraph.into());
        }

        let mut balances: Vec<(NetworkSelector, U256)> = Vec::with_capacity(networks.len());
        for network in networks {
            balances.push((network, liquidity_or_zero(graph, network)?));
        }

        let (target, _) = balances
            .iter()
            .skip(1)
            .fold(balances[0], |best, candidate| {
                if candidate.1 > best.1 {
                    *candidate
                } else {
                    best
                }
            });

        Ok(balances
            .into_iter()
            .filter(|(network, liquidity)| *network != target && !liquidity.is_zero())
            .map(|(network, liquidity)| Transfer::new(network, target, liquidity))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Data;

    fn graph_with(balances: &[(u64, u64)]) -> LiquidityGraph {
        let g = LiquidityGraph::new();
        for (network, liquidity) in balances {
            g.add_network(
                NetworkSelector(*network),
                Data {
                    liquidity: Some(U256::from(*liquidity)),
                    network_selector: NetworkSelector(*network),
                    ..Default::default()
                },
            );
        }
        g
    }

    #[test]
    fn moves_everything_to_the_richest_network() {
        let g = graph_with(&[(10, 1000), (20, 500), (30, 200), (40, 300)]);
        let transfers = GreedyMax.compute_transfers_to_balance(&g, &[]).unwrap();

        assert_eq!(transfers.len(), 3);
        assert!(transfers.iter().all(|t| t.to == NetworkSelector(10)));
        let amounts: Vec<U256> = transfers.iter().map(|t| t.amount).collect();
        assert_eq!(
            amounts,
            vec![U256::from(500), U256::from(200), U256::from(300)]
        );
    }

    #[test]
    fn zero_liquidity_networks_send_nothing() {
        let g = graph_with(&[(10, 1000), (20, 0), (30, 200)]);
        g.add_network(NetworkSelector(50), Data::default());
        let transfers = GreedyMax.compute_transfers_to_balance(&g, &[]).unwrap();

        assert_eq!(transfers, vec![Transfer::new(NetworkSelector(30), NetworkSelector(10), U256::from(200))]);
    }

    #[test]
    fn ties_go_to_the_lowest_selector() {
        let g = graph_with(&[(3, 100), (1, 100), (2, 50)]);
        let transfers = GreedyMax.compute_transfers_to_balance(&g, &[]).unwrap();
        assert!(transfers.iter().all(|t| t.to == NetworkSelector(1)));
        assert_eq!(transfers.len(), 2);
    }

    #[test]
    fn empty_graph_is_an_error() {
        let err = GreedyMax
            .compute_transfers_to_balance(&LiquidityGraph::new(), &[])
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<StrategyError>(),
            Some(&StrategyError::EmptyGraph)
        );
    }
}
