use anyhow::Result;
use ethers::types::U256;
use log::trace;

use crate::graph::{GraphError, LiquidityGraph};
use crate::models::{NetworkSelector, PendingTransfer, Transfer};
use crate::strategy::{liquidity_or_zero, RebalancingStrategy};

/// Spreads each network's free balance evenly over its bidirectional neighbors.
///
/// Free balance is liquidity minus whatever the network already has inflight
/// outbound. A neighbor qualifies when it has an edge back to the network and no
/// transfer is inflight between the two in either direction. If the balance is too
/// small to give every neighbor a positive share, neighbors are dropped from the
/// end of the (sorted) list until it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct BidirectionalSplit;

impl BidirectionalSplit {
    fn has_inflight_between(
        pending: &[PendingTransfer],
        a: NetworkSelector,
        b: NetworkSelector,
    ) -> bool {
        pending
            .iter()
            .any(|p| (p.from == a && p.to == b) || (p.from == b && p.to == a))
    }
}

impl RebalancingStrategy for BidirectionalSplit {
    fn name(&self) -> &'static str {
        "bidirectional_split"
    }

    fn compute_transfers_to_balance(
        &self,
        graph: &LiquidityGraph,
        pending: &[PendingTransfer],
    ) -> Result<Vec<Transfer>> {
        let mut transfers = Vec::new();

        for network in graph.networks() {
            let liquidity = liquidity_or_zero(graph, network)?;
            let outbound = pending
                .iter()
                .filter(|p| p.from == network)
                .fold(U256::zero(), |acc, p| acc.saturating_add(p.amount));

            let balance = match liquidity.checked_sub(outbound) {
                Some(b) if !b.is_zero() => b,
                _ => {
                    trace!(
                        "Network {} has no free balance (liquidity={}, outbound={})",
                        network,
                        liquidity,
                        outbound
                    );
                    continue;
                }
            };

            let neighbors = graph.get_neighbors(network).ok_or_else(|| {
                GraphError::InternalConsistency(format!(
                    "network {} listed without adjacency",
                    network
                ))
            })?;

            let mut candidates = Vec::with_capacity(neighbors.len());
            for neighbor in neighbors {
                if !graph.has_network(neighbor) {
                    return Err(GraphError::InternalConsistency(format!(
                        "neighbor {} of {} is not a vertex",
                        neighbor, network
                    ))
                    .into());
                }
                if !graph.has_connection(neighbor, network) {
                    continue;
                }
                if Self::has_inflight_between(pending, network, neighbor) {
                    continue;
                }
                candidates.push(neighbor);
            }

            if candidates.is_empty() {
                continue;
            }

            let mut share = balance / U256::from(candidates.len());
            while share.is_zero() && candidates.len() > 1 {
                candidates.pop();
                share = balance / U256::from(candidates.len());
            }

            for neighbor in candidates {
                transfers.push(Transfer::new(network, neighbor, share));
            }
        }

        Ok(transfers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Data;
    use crate::models::TransferStatus;

    fn net(n: u64) -> NetworkSelector {
        NetworkSelector(n)
    }

    fn graph(balances: &[(u64, u64)], edges: &[(u64, u64)]) -> LiquidityGraph {
        let g = LiquidityGraph::new();
        for (n, l) in balances {
            g.add_network(
                net(*n),
                Data {
                    liquidity: Some(U256::from(*l)),
                    ..Default::default()
                },
            );
        }
        for (a, b) in edges {
            g.add_connection(net(*a), net(*b)).unwrap();
        }
        g
    }

    fn pending(from: u64, to: u64, amount: u64) -> PendingTransfer {
        PendingTransfer::new(
            Transfer::new(net(from), net(to), U256::from(amount)),
            TransferStatus::Ready,
            "",
        )
    }

    #[test]
    fn splits_evenly_over_bidirectional_neighbors() {
        // 1 <-> 2, 1 <-> 3, 1 -> 4 (one way only)
        let g = graph(
            &[(1, 100), (2, 0), (3, 0), (4, 0)],
            &[(1, 2), (2, 1), (1, 3), (3, 1), (1, 4)],
        );
        let transfers = BidirectionalSplit
            .compute_transfers_to_balance(&g, &[])
            .unwrap();

        assert_eq!(
            transfers,
            vec![
                Transfer::new(net(1), net(2), U256::from(50)),
                Transfer::new(net(1), net(3), U256::from(50)),
            ]
        );
    }

    #[test]
    fn inflight_amounts_and_pairs_are_excluded() {
        let g = graph(
            &[(1, 100), (2, 10), (3, 0)],
            &[(1, 2), (2, 1), (1, 3), (3, 1)],
        );
        // 1 already sends 40 to 2: free balance 60, pair (1,2) is busy.
        let transfers = BidirectionalSplit
            .compute_transfers_to_balance(&g, &[pending(1, 2, 40)])
            .unwrap();

        assert_eq!(transfers, vec![Transfer::new(net(1), net(3), U256::from(60))]);
    }

    #[test]
    fn shrinks_neighbor_set_until_share_is_positive() {
        let g = graph(
            &[(1, 2), (2, 0), (3, 0), (4, 0)],
            &[(1, 2), (2, 1), (1, 3), (3, 1), (1, 4), (4, 1)],
        );
        let transfers = BidirectionalSplit
            .compute_transfers_to_balance(&g, &[])
            .unwrap();

        assert_eq!(
            transfers,
            vec![
                Transfer::new(net(1), net(2), U256::from(1)),
                Transfer::new(net(1), net(3), U256::from(1)),
            ]
        );
    }

    #[test]
    fn skips_networks_without_free_balance() {
        let g = graph(&[(1, 50), (2, 0)], &[(1, 2), (2, 1)]);
        let transfers = BidirectionalSplit
            .compute_transfers_to_balance(&g, &[pending(1, 3, 80)])
            .unwrap();
        assert!(transfers.is_empty());
    }
}
