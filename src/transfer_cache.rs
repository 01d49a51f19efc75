//! # Transfer Caches
//!
//! Node-local de-duplication of transfers across overlapping rounds.
//!
//! - [`PendingTransfersCache`]: what the chain (or this node's own reports) says is
//!   already pending. Replaced wholesale every Observation, appended to when a
//!   report is approved for transmission.
//! - [`InflightCache`]: transfers this node believes are executing, keyed by
//!   `(from, to, amount)`. Entries leave once the chain reports them confirmed, or
//!   once they outlive the configured TTL without ever being seen confirmed.
//!
//! Each cache is guarded by one `RwLock`; neither ever takes the other's lock.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::models::{NetworkSelector, PendingTransfer, Transfer};

/// The source chain logs a send and the destination later logs its receipt, so one
/// transfer can be read twice. Each confirmed entry retires one unconfirmed entry
/// for the same transfer; the confirmed one is kept.
pub fn settle_confirmed(pending: Vec<PendingTransfer>) -> Vec<PendingTransfer> {
    let mut unsettled: Vec<bool> = vec![true; pending.len()];
    for (i, confirmed) in pending.iter().enumerate() {
        if !confirmed.status.is_confirmed() {
            continue;
        }
        if let Some(j) = (0..pending.len()).find(|&j| {
            unsettled[j] && !pending[j].status.is_confirmed() && pending[j].transfer == confirmed.transfer
        }) {
            unsettled[j] = false;
            debug!("Transfer {} settled by {}", pending[j].id, pending[i].id);
        }
    }
    pending
        .into_iter()
        .zip(unsettled)
        .filter_map(|(p, keep)| keep.then_some(p))
        .collect()
}

#[derive(Debug, Default)]
pub struct PendingTransfersCache {
    transfers: RwLock<Vec<Transfer>>,
}

impl PendingTransfersCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, transfers: &[Transfer]) {
        self.transfers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(transfers);
    }

    pub fn set(&self, transfers: Vec<Transfer>) {
        *self.transfers.write().unwrap_or_else(PoisonError::into_inner) = transfers;
    }

    /// Linear scan using transfer equality (from, to, amount).
    pub fn contains_transfer(&self, transfer: &Transfer) -> bool {
        self.transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|t| t == transfer)
    }

    pub fn len(&self) -> usize {
        self.transfers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type InflightKey = (NetworkSelector, NetworkSelector, String);

fn inflight_key(t: &Transfer) -> InflightKey {
    (t.from, t.to, t.amount.to_string())
}

#[derive(Debug, Default)]
pub struct InflightCache {
    inflight: RwLock<BTreeMap<InflightKey, (Transfer, Instant)>>,
}

impl InflightCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, transfers: &[Transfer]) {
        let mut inflight = self.inflight.write().unwrap_or_else(PoisonError::into_inner);
        for t in transfers {
            inflight.insert(inflight_key(t), (t.clone(), Instant::now()));
        }
    }

    pub fn is_inflight(&self, transfer: &Transfer) -> bool {
        self.inflight
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&inflight_key(transfer))
    }

    /// Drops every inflight entry matching a finalized or executed pending transfer.
    /// Returns how many entries were removed.
    pub fn expire(&self, pending: &[PendingTransfer]) -> usize {
        let mut inflight = self.inflight.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for p in pending.iter().filter(|p| p.status.is_confirmed()) {
            if inflight.remove(&inflight_key(&p.transfer)).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Expired {} inflight transfers, {} remaining", removed, inflight.len());
        }
        removed
    }

    /// Drops entries added at least `max_age` ago. Returns how many were removed.
    pub fn expire_older_than(&self, max_age: Duration) -> usize {
        let mut inflight = self.inflight.write().unwrap_or_else(PoisonError::into_inner);
        let before = inflight.len();
        inflight.retain(|_, (_, added)| added.elapsed() < max_age);
        let removed = before - inflight.len();
        if removed > 0 {
            warn!(
                "Forgot {} inflight transfers never seen confirmed within {:?}",
                removed, max_age
            );
        }
        removed
    }

    /// Snapshot sorted by source network.
    pub fn get_all(&self) -> Vec<Transfer> {
        let mut all: Vec<Transfer> = self
            .inflight
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|(t, _)| t.clone())
            .collect();
        all.sort_by_key(|t| t.from);
        all
    }

    pub fn len(&self) -> usize {
        self.inflight.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransferStatus;
    use ethers::types::U256;

    fn transfer(from: u64, to: u64, amount: u64) -> Transfer {
        Transfer::new(NetworkSelector(from), NetworkSelector(to), U256::from(amount))
    }

    #[test]
    fn pending_set_replaces_and_add_appends() {
        let cache = PendingTransfersCache::new();
        let (a, b, c) = (transfer(1, 2, 10), transfer(2, 3, 20), transfer(3, 1, 30));

        cache.set(vec![a.clone(), b.clone()]);
        cache.add(&[c.clone()]);
        assert!(cache.contains_transfer(&a));
        assert!(cache.contains_transfer(&b));
        assert!(cache.contains_transfer(&c));

        cache.set(vec![c.clone()]);
        assert!(!cache.contains_transfer(&a));
        assert!(!cache.contains_transfer(&b));
        assert!(cache.contains_transfer(&c));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn pending_equality_ignores_bridge_data() {
        let cache = PendingTransfersCache::new();
        cache.add(&[transfer(1, 2, 10).with_bridge_data(vec![1u8, 2, 3])]);
        assert!(cache.contains_transfer(&transfer(1, 2, 10)));
        assert!(!cache.contains_transfer(&transfer(1, 2, 11)));
    }

    #[test]
    fn inflight_expires_only_confirmed() {
        let cache = InflightCache::new();
        cache.add(&[transfer(1, 2, 10), transfer(2, 3, 20), transfer(3, 1, 30)]);
        assert!(cache.is_inflight(&transfer(2, 3, 20)));

        let pending = vec![
            PendingTransfer::new(transfer(1, 2, 10), TransferStatus::Finalized, "a"),
            PendingTransfer::new(transfer(2, 3, 20), TransferStatus::Ready, "b"),
            PendingTransfer::new(transfer(3, 1, 30), TransferStatus::Executed, "c"),
            PendingTransfer::new(transfer(9, 9, 99), TransferStatus::Executed, "d"),
        ];
        assert_eq!(cache.expire(&pending), 2);
        assert_eq!(cache.get_all(), vec![transfer(2, 3, 20)]);
    }

    #[test]
    fn inflight_entries_age_out() {
        let cache = InflightCache::new();
        cache.add(&[transfer(1, 2, 10), transfer(2, 3, 20)]);

        assert_eq!(cache.expire_older_than(Duration::from_secs(3_600)), 0);
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.expire_older_than(Duration::ZERO), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn receipt_settles_one_matching_send() {
        let pending = vec![
            PendingTransfer::new(transfer(1, 2, 10), TransferStatus::NotReady, "send-a"),
            PendingTransfer::new(transfer(1, 2, 10), TransferStatus::NotReady, "send-b"),
            PendingTransfer::new(transfer(3, 2, 10), TransferStatus::Ready, "send-c"),
            PendingTransfer::new(transfer(1, 2, 10), TransferStatus::Executed, "receipt-a"),
        ];

        let ids: Vec<String> = settle_confirmed(pending).into_iter().map(|p| p.id).collect();

        assert_eq!(ids, vec!["send-b", "send-c", "receipt-a"]);
    }

    #[test]
    fn inflight_snapshot_sorted_by_source() {
        let cache = InflightCache::new();
        cache.add(&[transfer(5, 1, 1), transfer(2, 1, 1), transfer(9, 1, 1)]);
        let froms: Vec<u64> = cache.get_all().iter().map(|t| t.from.as_u64()).collect();
        assert_eq!(froms, vec![2, 5, 9]);
    }
}
