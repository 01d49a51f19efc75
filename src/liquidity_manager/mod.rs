//! # Liquidity Manager
//!
//! Abstraction over the on-chain liquidity manager (rebalancer) contract of one
//! network, and the factory that hands out instances per `(network, address)`.
//!
//! ## Network types
//!
//! Every configured network carries a [`ChainClient`], a tagged union of the
//! dependencies needed to talk to that kind of chain. The factory dispatches on it:
//! EVM networks get an [`evm::EvmLiquidityManager`], anything without a node-side
//! implementation fails with [`FactoryError::UnsupportedNetworkType`] instead of
//! handing back a half-working client.

pub mod evm;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::providers::{Http, Provider};
use ethers::types::U256;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::XChainRebalancerData;
use crate::models::{Address, NetworkSelector, PendingTransfer};
use crate::ocr3::ConfigDetails;

pub use evm::EvmLiquidityManager;

/// Family of chain a network belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Evm,
    Solana,
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkType::Evm => write!(f, "evm"),
            NetworkType::Solana => write!(f, "solana"),
        }
    }
}

/// Per-network dependency bundle.
#[derive(Debug, Clone)]
pub enum ChainClient {
    Evm(Arc<Provider<Http>>),
    Solana { rpc_url: String },
}

impl ChainClient {
    pub fn network_type(&self) -> NetworkType {
        match self {
            ChainClient::Evm(_) => NetworkType::Evm,
            ChainClient::Solana { .. } => NetworkType::Solana,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FactoryError {
    #[error("network type {network_type} of network {network} is not supported")]
    UnsupportedNetworkType {
        network_type: NetworkType,
        network: NetworkSelector,
    },
    #[error("no chain client configured for network {0}")]
    UnknownNetwork(NetworkSelector),
}

/// Reads and lifecycle of one liquidity manager contract.
#[async_trait]
pub trait LiquidityManager: Send + Sync {
    /// Current balance of the managed token held by the contract.
    async fn get_balance(&self) -> Result<U256>;

    async fn get_token_address(&self) -> Result<Address>;

    /// Configured cross-chain peers, keyed by remote network.
    async fn get_xchain_rebalancers(
        &self,
    ) -> Result<BTreeMap<NetworkSelector, XChainRebalancerData>>;

    /// Peer discovery: remote liquidity manager address per connected network.
    async fn get_liquidity_managers(&self) -> Result<BTreeMap<NetworkSelector, Address>> {
        Ok(self
            .get_xchain_rebalancers()
            .await?
            .into_iter()
            .map(|(network, data)| (network, data.remote_rebalancer_address))
            .collect())
    }

    /// Transfers sent by this manager that are not settled yet.
    async fn get_pending_transfers(&self) -> Result<Vec<PendingTransfer>>;

    /// Block and digest of the contract's current OCR configuration.
    async fn get_latest_config_details(&self) -> Result<ConfigDetails>;

    async fn close(&self) -> Result<()>;
}

pub trait LiquidityManagerFactory: Send + Sync {
    fn new_liquidity_manager(
        &self,
        network: NetworkSelector,
        address: Address,
    ) -> Result<Arc<dyn LiquidityManager>>;
}

/// Factory dispatching on the configured [`ChainClient`] of each network.
///
/// Instances are cached per `(network, address)` so repeated rounds reuse the same
/// contract bindings.
pub struct BaseLiquidityManagerFactory {
    clients: HashMap<NetworkSelector, ChainClient>,
    instances: DashMap<(NetworkSelector, Address), Arc<dyn LiquidityManager>>,
}

impl BaseLiquidityManagerFactory {
    pub fn new(clients: HashMap<NetworkSelector, ChainClient>) -> Self {
        Self {
            clients,
            instances: DashMap::new(),
        }
    }

    pub fn network_type(&self, network: NetworkSelector) -> Option<NetworkType> {
        self.clients.get(&network).map(ChainClient::network_type)
    }
}

impl LiquidityManagerFactory for BaseLiquidityManagerFactory {
    fn new_liquidity_manager(
        &self,
        network: NetworkSelector,
        address: Address,
    ) -> Result<Arc<dyn LiquidityManager>> {
        if let Some(existing) = self.instances.get(&(network, address)) {
            return Ok(existing.value().clone());
        }

        let client = self
            .clients
            .get(&network)
            .ok_or(FactoryError::UnknownNetwork(network))?;

        let manager: Arc<dyn LiquidityManager> = match client {
            ChainClient::Evm(provider) => {
                debug!(
                    "Creating EVM liquidity manager {:?} on network {}",
                    address, network
                );
                Arc::new(EvmLiquidityManager::new(network, address, provider.clone()))
            }
            ChainClient::Solana { .. } => {
                return Err(FactoryError::UnsupportedNetworkType {
                    network_type: NetworkType::Solana,
                    network,
                }
                .into())
            }
        };

        Ok(self
            .instances
            .entry((network, address))
            .or_insert(manager)
            .value()
            .clone())
    }
}
