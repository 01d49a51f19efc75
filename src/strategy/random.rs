use anyhow::Result;
use ethers::types::U256;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::graph::LiquidityGraph;
use crate::models::{PendingTransfer, Transfer};
use crate::strategy::{liquidity_or_zero, RebalancingStrategy};

/// Emits up to `max_transfers` random transfers along existing edges.
///
/// Meant for exercising the transmission path on test networks. The generator is
/// seeded from the liquidity of the lowest network so every oracle holding the same
/// Outcome draws the same sequence.
#[derive(Debug, Clone, Copy)]
pub struct DeterministicRandom {
    max_transfers: usize,
}

impl DeterministicRandom {
    pub fn new(max_transfers: usize) -> Self {
        Self { max_transfers }
    }
}

impl RebalancingStrategy for DeterministicRandom {
    fn name(&self) -> &'static str {
        "random"
    }

    fn compute_transfers_to_balance(
        &self,
        graph: &LiquidityGraph,
        _pending: &[PendingTransfer],
    ) -> Result<Vec<Transfer>> {
        let first = match graph.networks().into_iter().next() {
            Some(n) => n,
            None => return Ok(Vec::new()),
        };
        let edges = graph.get_edges();
        if edges.is_empty() {
            return Ok(Vec::new());
        }

        let seed = liquidity_or_zero(graph, first)?.low_u64();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let count = rng.gen_range(0..=self.max_transfers);
        let mut transfers = Vec::with_capacity(count);
        for _ in 0..count {
            let edge = edges[rng.gen_range(0..edges.len())];
            let available = liquidity_or_zero(graph, edge.source)?;
            if available.is_zero() {
                continue;
            }
            let bound = if available > U256::from(u64::MAX) {
                u64::MAX
            } else {
                available.as_u64()
            };
            let amount = rng.gen_range(1..=bound);
            transfers.push(Transfer::new(edge.source, edge.dest, U256::from(amount)));
        }

        Ok(transfers)
    }
}
