//! # Discoverer
//!
//! Builds a [`LiquidityGraph`] by walking the liquidity manager contracts
//! breadth-first from a configured root `(network, address)`.
//!
//! For every visited manager the discoverer reads its balance, token, configured
//! cross-chain peers and current config digest. Each peer becomes an edge and, if
//! not yet seen, a vertex to visit. Vertices are de-duplicated by
//! `(network, address)`.
//!
//! Any failed on-chain read aborts the walk; a partial graph is never returned.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};

use crate::graph::{Data, LiquidityGraph};
use crate::liquidity_manager::{FactoryError, LiquidityManager, LiquidityManagerFactory, NetworkType};
use crate::models::{Address, NetworkSelector};

#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn discover(&self) -> Result<LiquidityGraph>;
}

pub trait DiscovererFactory: Send + Sync {
    fn new_discoverer(
        &self,
        network: NetworkSelector,
        address: Address,
    ) -> Result<Box<dyn Discoverer>>;
}

/// Breadth-first discoverer over any chain the liquidity manager factory supports.
pub struct BfsDiscoverer {
    root_network: NetworkSelector,
    root_address: Address,
    factory: Arc<dyn LiquidityManagerFactory>,
}

impl BfsDiscoverer {
    pub fn new(
        root_network: NetworkSelector,
        root_address: Address,
        factory: Arc<dyn LiquidityManagerFactory>,
    ) -> Self {
        Self {
            root_network,
            root_address,
            factory,
        }
    }
}

/// Reads everything a graph vertex carries from the manager at `(network, address)`.
pub async fn read_network_data(
    lm: &dyn LiquidityManager,
    network: NetworkSelector,
    address: Address,
) -> Result<Data> {
    let liquidity = lm.get_balance().await.context("get balance")?;
    let token_address = lm.get_token_address().await.context("get token address")?;
    let xchain_rebalancers = lm
        .get_xchain_rebalancers()
        .await
        .context("get cross-chain rebalancers")?;
    let config = lm
        .get_latest_config_details()
        .await
        .context("get latest config details")?;

    Ok(Data {
        liquidity: Some(liquidity),
        token_address,
        rebalancer_address: address,
        xchain_rebalancers,
        config_digest: config.config_digest,
        network_selector: network,
    })
}

#[async_trait]
impl Discoverer for BfsDiscoverer {
    async fn discover(&self) -> Result<LiquidityGraph> {
        let graph = LiquidityGraph::new();
        let root = (self.root_network, self.root_address);

        let mut seen: HashSet<(NetworkSelector, Address)> = HashSet::new();
        let mut queue: VecDeque<(NetworkSelector, Address)> = VecDeque::new();
        let mut edges: Vec<(NetworkSelector, NetworkSelector)> = Vec::new();
        seen.insert(root);
        queue.push_back(root);

        while let Some((network, address)) = queue.pop_front() {
            let lm = self
                .factory
                .new_liquidity_manager(network, address)
                .with_context(|| format!("liquidity manager ({}, {:?})", network, address))?;

            let data = read_network_data(lm.as_ref(), network, address).await?;

            for (peer_network, peer) in &data.xchain_rebalancers {
                edges.push((network, *peer_network));
                let key = (*peer_network, peer.remote_rebalancer_address);
                if seen.insert(key) {
                    queue.push_back(key);
                }
            }

            debug!(
                "Discovered network {} (manager={:?}, liquidity={}, peers={})",
                network,
                address,
                data.liquidity.unwrap_or_default(),
                data.xchain_rebalancers.len()
            );

            let added = graph.add_network(network, data);
            if !added {
                warn!(
                    "⚠️ Network {} reached through a second liquidity manager {:?}; keeping the first one",
                    network, address
                );
            }
        }

        for (from, to) in edges {
            graph
                .add_connection(from, to)
                .with_context(|| format!("add edge {} -> {}", from, to))?;
        }

        info!(
            "🔎 Discovery from network {} found {} networks and {} edges",
            self.root_network,
            graph.len(),
            graph.get_edges().len()
        );

        Ok(graph)
    }
}

/// Picks a discoverer implementation from the root network's type.
pub struct BaseDiscovererFactory {
    network_types: HashMap<NetworkSelector, NetworkType>,
    lm_factory: Arc<dyn LiquidityManagerFactory>,
}

impl BaseDiscovererFactory {
    pub fn new(
        network_types: HashMap<NetworkSelector, NetworkType>,
        lm_factory: Arc<dyn LiquidityManagerFactory>,
    ) -> Self {
        Self {
            network_types,
            lm_factory,
        }
    }
}

impl DiscovererFactory for BaseDiscovererFactory {
    fn new_discoverer(
        &self,
        network: NetworkSelector,
        address: Address,
    ) -> Result<Box<dyn Discoverer>> {
        match self.network_types.get(&network) {
            Some(NetworkType::Evm) => Ok(Box::new(BfsDiscoverer::new(
                network,
                address,
                self.lm_factory.clone(),
            ))),
            Some(network_type) => Err(FactoryError::UnsupportedNetworkType {
                network_type: *network_type,
                network,
            }
            .into()),
            None => Err(FactoryError::UnknownNetwork(network).into()),
        }
    }
}
