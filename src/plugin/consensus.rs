// Consensus math for the Outcome step: per-network median liquidity and the f+1 rule
// for pending transfers. Pure functions, so every honest oracle reduces the same
// observations to the same Outcome.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use ethers::types::U256;

use crate::models::{NetworkLiquidity, NetworkSelector, Observation, PendingTransfer};

/// Element at index `len / 2` after sorting. For an even count that is the upper
/// of the two middle values. `None` for an empty input.
pub fn big_int_sorted_middle(mut values: Vec<U256>) -> Option<U256> {
    if values.is_empty() {
        return None;
    }
    values.sort();
    Some(values[values.len() / 2])
}

/// Median liquidity per network over every observation that reported it,
/// in ascending network order.
pub fn median_liquidity_per_chain(observations: &[Observation]) -> Vec<NetworkLiquidity> {
    let mut reported: BTreeMap<NetworkSelector, Vec<U256>> = BTreeMap::new();
    for observation in observations {
        for entry in &observation.liquidity_per_chain {
            reported.entry(entry.network).or_default().push(entry.liquidity);
        }
    }

    reported
        .into_iter()
        .filter_map(|(network, values)| {
            big_int_sorted_middle(values).map(|median| NetworkLiquidity::new(network, median))
        })
        .collect()
}

/// Pending transfers whose content hash was reported by at least `f + 1` distinct
/// observations. A transfer repeated inside one observation counts once.
///
/// Output is sorted by `(from, to, hash)`.
pub fn pending_transfers_with_quorum(
    observations: &[Observation],
    f: usize,
) -> Result<Vec<PendingTransfer>> {
    let mut votes: HashMap<[u8; 32], (usize, PendingTransfer)> = HashMap::new();

    for observation in observations {
        let mut seen = HashSet::new();
        for pending in &observation.pending_transfers {
            let hash = pending.content_hash()?;
            if !seen.insert(hash) {
                continue;
            }
            votes
                .entry(hash)
                .or_insert_with(|| (0, pending.clone()))
                .0 += 1;
        }
    }

    let mut agreed: Vec<([u8; 32], PendingTransfer)> = votes
        .into_iter()
        .filter(|(_, (count, _))| *count >= f + 1)
        .map(|(hash, (_, pending))| (hash, pending))
        .collect();
    agreed.sort_by(|(ha, a), (hb, b)| (a.from, a.to, ha).cmp(&(b.from, b.to, hb)));

    Ok(agreed.into_iter().map(|(_, pending)| pending).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Transfer, TransferStatus};

    fn u(values: &[u64]) -> Vec<U256> {
        values.iter().map(|v| U256::from(*v)).collect()
    }

    fn pending(from: u64, to: u64, amount: u64) -> PendingTransfer {
        PendingTransfer::new(
            Transfer::new(NetworkSelector(from), NetworkSelector(to), U256::from(amount)),
            TransferStatus::Ready,
            format!("{}-{}-{}", from, to, amount),
        )
    }

    fn observation_with(pending: Vec<PendingTransfer>) -> Observation {
        Observation::new(vec![], pending)
    }

    #[test]
    fn sorted_middle_takes_upper_median() {
        assert_eq!(big_int_sorted_middle(u(&[100, 200, 300, 400])), Some(U256::from(300)));
        assert_eq!(big_int_sorted_middle(u(&[300, 100, 200])), Some(U256::from(200)));
        assert_eq!(big_int_sorted_middle(u(&[7])), Some(U256::from(7)));
        assert_eq!(big_int_sorted_middle(vec![]), None);
    }

    #[test]
    fn median_is_computed_per_network() {
        let observations = vec![
            Observation::new(
                vec![
                    NetworkLiquidity::new(NetworkSelector(2), U256::from(10)),
                    NetworkLiquidity::new(NetworkSelector(1), U256::from(500)),
                ],
                vec![],
            ),
            Observation::new(
                vec![
                    NetworkLiquidity::new(NetworkSelector(1), U256::from(100)),
                    NetworkLiquidity::new(NetworkSelector(2), U256::from(30)),
                ],
                vec![],
            ),
            Observation::new(
                vec![NetworkLiquidity::new(NetworkSelector(1), U256::from(300))],
                vec![],
            ),
        ];

        assert_eq!(
            median_liquidity_per_chain(&observations),
            vec![
                NetworkLiquidity::new(NetworkSelector(1), U256::from(300)),
                NetworkLiquidity::new(NetworkSelector(2), U256::from(30)),
            ]
        );
    }

    #[test]
    fn pending_needs_f_plus_one_votes() {
        let shared = pending(1, 2, 10);
        let lonely = pending(3, 4, 99);
        let observations = vec![
            observation_with(vec![shared.clone(), lonely.clone()]),
            observation_with(vec![shared.clone()]),
            observation_with(vec![shared.clone()]),
            observation_with(vec![]),
            observation_with(vec![]),
        ];

        let agreed = pending_transfers_with_quorum(&observations, 1).unwrap();
        assert_eq!(agreed, vec![shared]);
    }

    #[test]
    fn repeated_entries_in_one_observation_count_once() {
        let p = pending(1, 2, 10);
        let observations = vec![
            observation_with(vec![p.clone(), p.clone(), p.clone()]),
            observation_with(vec![]),
        ];
        assert!(pending_transfers_with_quorum(&observations, 1)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn status_is_part_of_the_vote() {
        let ready = pending(1, 2, 10);
        let mut finalized = ready.clone();
        finalized.status = TransferStatus::Finalized;

        let observations = vec![
            observation_with(vec![ready.clone()]),
            observation_with(vec![finalized]),
        ];
        assert!(pending_transfers_with_quorum(&observations, 1)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn agreed_transfers_are_sorted() {
        let a = pending(5, 1, 1);
        let b = pending(1, 9, 1);
        let c = pending(1, 2, 1);
        let observations = vec![
            observation_with(vec![a.clone(), b.clone(), c.clone()]),
            observation_with(vec![c.clone(), a.clone(), b.clone()]),
        ];
        assert_eq!(
            pending_transfers_with_quorum(&observations, 1).unwrap(),
            vec![c, b, a]
        );
    }
}
