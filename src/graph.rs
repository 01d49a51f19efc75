//! # Liquidity Graph
//!
//! Directed graph of networks participating in rebalancing. Each vertex carries the
//! liquidity-manager data of one network; an edge `A -> B` means the liquidity
//! manager on `A` can send liquidity to `B`.
//!
//! ## Determinism
//!
//! Vertices and adjacency lists are kept in ordered maps/sets, so every listing
//! (`networks`, `get_neighbors`, `get_edges`) comes back sorted. Rebalancing
//! strategies depend on this: two nodes holding the same graph must iterate it in
//! the same order.
//!
//! ## Edges
//!
//! `add_connection` is idempotent. Adding the same directed edge twice keeps one
//! edge, and `get_edges` reports it once.
//!
//! ## Thread Safety
//!
//! The whole structure sits behind one `RwLock`. Readers run concurrently, writers
//! are exclusive, and no method holds the lock across an `.await`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ethers::types::U256;
use thiserror::Error;

use crate::models::{Address, ConfigDigest, Edge, NetworkSelector};

/// Bridge wiring between a local liquidity manager and its peer on another network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XChainRebalancerData {
    pub remote_rebalancer_address: Address,
    pub local_bridge_adapter_address: Address,
    pub remote_token_address: Address,
}

/// Vertex payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Data {
    /// `None` until the first balance sync.
    pub liquidity: Option<U256>,
    pub token_address: Address,
    pub rebalancer_address: Address,
    pub xchain_rebalancers: BTreeMap<NetworkSelector, XChainRebalancerData>,
    pub config_digest: ConfigDigest,
    pub network_selector: NetworkSelector,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("network {0} not found in graph")]
    UnknownNetwork(NetworkSelector),
    #[error("graph internal consistency violated: {0}")]
    InternalConsistency(String),
}

#[derive(Debug, Clone, Default)]
struct GraphInner {
    adjacency: BTreeMap<NetworkSelector, BTreeSet<NetworkSelector>>,
    data: BTreeMap<NetworkSelector, Data>,
}

/// Thread-safe liquidity graph.
#[derive(Debug, Default)]
pub struct LiquidityGraph {
    inner: RwLock<GraphInner>,
}

impl Clone for LiquidityGraph {
    fn clone(&self) -> Self {
        Self {
            inner: RwLock::new(self.read().clone()),
        }
    }
}

impl LiquidityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a network. Returns `false` (and keeps the stored data) if it already exists.
    pub fn add_network(&self, network: NetworkSelector, data: Data) -> bool {
        let mut g = self.write();
        if g.data.contains_key(&network) {
            return false;
        }
        g.data.insert(network, data);
        g.adjacency.insert(network, BTreeSet::new());
        true
    }

    pub fn has_network(&self, network: NetworkSelector) -> bool {
        self.read().data.contains_key(&network)
    }

    /// Overwrites the liquidity of a known network. Returns `false` for unknown networks.
    pub fn set_liquidity(&self, network: NetworkSelector, liquidity: U256) -> bool {
        let mut g = self.write();
        match g.data.get_mut(&network) {
            Some(data) => {
                data.liquidity = Some(liquidity);
                true
            }
            None => false,
        }
    }

    /// Liquidity of `network`; `Ok(None)` if the network exists but was never synced.
    pub fn get_liquidity(&self, network: NetworkSelector) -> Result<Option<U256>, GraphError> {
        self.with_data(network, |d| d.liquidity)
    }

    pub fn get_data(&self, network: NetworkSelector) -> Result<Data, GraphError> {
        self.with_data(network, Data::clone)
    }

    pub fn get_token_address(&self, network: NetworkSelector) -> Result<Address, GraphError> {
        self.with_data(network, |d| d.token_address)
    }

    pub fn get_rebalancer_address(&self, network: NetworkSelector) -> Result<Address, GraphError> {
        self.with_data(network, |d| d.rebalancer_address)
    }

    pub fn get_xchain_rebalancer_data(
        &self,
        network: NetworkSelector,
    ) -> Result<BTreeMap<NetworkSelector, XChainRebalancerData>, GraphError> {
        self.with_data(network, |d| d.xchain_rebalancers.clone())
    }

    fn with_data<T>(
        &self,
        network: NetworkSelector,
        f: impl FnOnce(&Data) -> T,
    ) -> Result<T, GraphError> {
        self.read()
            .data
            .get(&network)
            .map(f)
            .ok_or(GraphError::UnknownNetwork(network))
    }

    /// Adds the directed edge `from -> to`. Both endpoints must already exist.
    pub fn add_connection(
        &self,
        from: NetworkSelector,
        to: NetworkSelector,
    ) -> Result<(), GraphError> {
        let mut g = self.write();
        if !g.data.contains_key(&from) {
            return Err(GraphError::UnknownNetwork(from));
        }
        if !g.data.contains_key(&to) {
            return Err(GraphError::UnknownNetwork(to));
        }
        g.adjacency.entry(from).or_default().insert(to);
        Ok(())
    }

    pub fn has_connection(&self, from: NetworkSelector, to: NetworkSelector) -> bool {
        self.read()
            .adjacency
            .get(&from)
            .map(|n| n.contains(&to))
            .unwrap_or(false)
    }

    /// Sorted outbound neighbors of `from`, or `None` if `from` is unknown.
    pub fn get_neighbors(&self, from: NetworkSelector) -> Option<Vec<NetworkSelector>> {
        self.read()
            .adjacency
            .get(&from)
            .map(|n| n.iter().copied().collect())
    }

    /// All networks in ascending selector order.
    pub fn networks(&self) -> Vec<NetworkSelector> {
        self.read().data.keys().copied().collect()
    }

    /// Every directed edge once, sorted by (source, dest).
    pub fn get_edges(&self) -> Vec<Edge> {
        let g = self.read();
        g.adjacency
            .iter()
            .flat_map(|(source, dests)| dests.iter().map(move |dest| Edge::new(*source, *dest)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.read().data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.read().data.len()
    }

    pub fn reset(&self) {
        let mut g = self.write();
        g.adjacency.clear();
        g.data.clear();
    }

    /// Reset and repopulate from `other` in one critical section, so readers never
    /// observe a partially rebuilt graph.
    pub fn replace(&self, other: LiquidityGraph) {
        let fresh = other
            .inner
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        *self.write() = fresh;
    }

    /// Copy of the topology and vertex data with every liquidity cleared.
    ///
    /// Reports start from this and fill in consensus liquidities, so the local
    /// (non-agreed) balances never leak into strategy input.
    pub fn clone_topology(&self) -> LiquidityGraph {
        let mut inner = self.read().clone();
        for data in inner.data.values_mut() {
            data.liquidity = None;
        }
        LiquidityGraph {
            inner: RwLock::new(inner),
        }
    }
}
