// Registry - liquidity manager address per network
// Grows as discovery finds new networks. Owned by the plugin and shared by reference.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use log::debug;

use crate::models::{Address, NetworkSelector};

#[derive(Debug, Default)]
pub struct Registry {
    managers: RwLock<BTreeMap<NetworkSelector, Address>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or re-points) the liquidity manager of `network`.
    /// Returns `true` if the entry was new or changed.
    pub fn add(&self, network: NetworkSelector, address: Address) -> bool {
        let mut managers = self.managers.write().unwrap_or_else(PoisonError::into_inner);
        let previous = managers.insert(network, address);
        if previous != Some(address) {
            debug!(
                "Registered liquidity manager {:?} for network {} (previous={:?})",
                address, network, previous
            );
            return true;
        }
        false
    }

    pub fn get(&self, network: NetworkSelector) -> Option<Address> {
        self.managers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&network)
            .copied()
    }

    /// Sorted snapshot of every registered manager.
    pub fn get_all(&self) -> Vec<(NetworkSelector, Address)> {
        self.managers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(n, a)| (*n, *a))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.managers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
