//! # Multichain Config Tracker
//!
//! One logical OCR instance spans every chain in the liquidity graph. Each chain's
//! liquidity manager emits its own `ConfigSet` event; this tracker reads the master
//! chain's event, pulls the matching events from every follower chain at the same
//! block height and folds them into a single [`ContractConfig`] through an injected
//! [`CombinerFn`].
//!
//! Construction goes through [`MultichainConfigTrackerBuilder`]: it walks the
//! manager graph from the master contract, checks that every chain with a log
//! poller has exactly one manager, and registers a `ConfigSet` filter per chain.
//! Misconfiguration fails the build and is never degraded at runtime.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::contract::EthEvent;
use ethers::types::H256;
use log::{debug, info};
use thiserror::Error;

use crate::contracts::ConfigSetFilter;
use crate::liquidity_manager::LiquidityManagerFactory;
use crate::log_poller::{LogFilter, LogPoller, LogPollerLog};
use crate::models::{Address, NetworkSelector};
use crate::ocr3::{ConfigDetails, ContractConfig, ContractConfigTracker};

/// Folds the master config and the follower configs (in ascending network order)
/// into the config the OCR runtime runs with.
pub type CombinerFn =
    Arc<dyn Fn(ContractConfig, Vec<ContractConfig>) -> Result<ContractConfig> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigTrackerError {
    #[error("master chain {0} has no log poller")]
    MissingMasterLogPoller(NetworkSelector),
    #[error("master chain and address are required")]
    MissingMaster,
    #[error("combiner function is required")]
    MissingCombiner,
    #[error("liquidity manager factory is required")]
    MissingFactory,
    #[error("{log_pollers} chains have log pollers but {managers} liquidity managers were discovered")]
    ChainCountMismatch { log_pollers: usize, managers: usize },
    #[error("network {network} has more than one liquidity manager ({first:?}, {second:?})")]
    DuplicateManager {
        network: NetworkSelector,
        first: Address,
        second: Address,
    },
    #[error("no log poller for discovered network {0}")]
    UnknownChain(NetworkSelector),
    #[error("no ConfigSet log on network {network} at block {block}")]
    MissingLog { network: NetworkSelector, block: u64 },
    #[error("decode ConfigSet log on network {network}: {reason}")]
    Decode {
        network: NetworkSelector,
        reason: String,
    },
    #[error("follower config #{follower} has {got} transmitters, master has {expected}")]
    TransmitterCountMismatch {
        follower: usize,
        expected: usize,
        got: usize,
    },
}

/// Name of the log filter registered on every tracked chain.
pub fn config_set_filter_name(network: NetworkSelector, address: Address) -> String {
    format!("rebalancer-config-set-{}-{:?}", network, address)
}

/// Topic0 of the liquidity manager's `ConfigSet` event.
pub fn config_set_event_sig() -> H256 {
    ConfigSetFilter::signature()
}

/// Decodes a `ConfigSet` log into the OCR config it announces.
pub fn decode_config_set(network: NetworkSelector, log: &LogPollerLog) -> Result<ContractConfig> {
    let event = <ConfigSetFilter as EthEvent>::decode_log(&log.to_raw_log()).map_err(|e| {
        ConfigTrackerError::Decode {
            network,
            reason: e.to_string(),
        }
    })?;

    Ok(ContractConfig {
        config_digest: H256::from(event.config_digest),
        config_count: event.config_count,
        signers: event.signers.iter().map(|s| s.as_bytes().to_vec()).collect(),
        transmitters: event
            .transmitters
            .iter()
            .map(|t| format!("{:?}", t))
            .collect(),
        f: event.f,
        onchain_config: event.onchain_config.to_vec(),
        offchain_config_version: event.offchain_config_version,
        offchain_config: event.offchain_config.to_vec(),
    })
}

/// Stock combiner: signers, threshold and digest come from the master; each
/// oracle's transmitter becomes its master transmitter followed by its transmitter
/// on every follower chain, comma separated.
pub fn combine_transmitters(
    master: ContractConfig,
    followers: Vec<ContractConfig>,
) -> Result<ContractConfig> {
    let expected = master.transmitters.len();
    for (i, follower) in followers.iter().enumerate() {
        if follower.transmitters.len() != expected {
            return Err(ConfigTrackerError::TransmitterCountMismatch {
                follower: i,
                expected,
                got: follower.transmitters.len(),
            }
            .into());
        }
    }

    let transmitters = (0..expected)
        .map(|i| {
            std::iter::once(master.transmitters[i].as_str())
                .chain(followers.iter().map(|f| f.transmitters[i].as_str()))
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect();

    Ok(ContractConfig {
        transmitters,
        ..master
    })
}

pub struct MultichainConfigTracker {
    master_chain: NetworkSelector,
    log_pollers: BTreeMap<NetworkSelector, Arc<dyn LogPoller>>,
    managers: BTreeMap<NetworkSelector, Address>,
    combiner: CombinerFn,
    lm_factory: Arc<dyn LiquidityManagerFactory>,
    confirmations: u64,
}

#[derive(Default)]
pub struct MultichainConfigTrackerBuilder {
    master: Option<(NetworkSelector, Address)>,
    log_pollers: BTreeMap<NetworkSelector, Arc<dyn LogPoller>>,
    combiner: Option<CombinerFn>,
    lm_factory: Option<Arc<dyn LiquidityManagerFactory>>,
    confirmations: u64,
}

impl MultichainConfigTrackerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn master(mut self, network: NetworkSelector, address: Address) -> Self {
        self.master = Some((network, address));
        self
    }

    pub fn log_poller(mut self, network: NetworkSelector, poller: Arc<dyn LogPoller>) -> Self {
        self.log_pollers.insert(network, poller);
        self
    }

    pub fn combiner(mut self, combiner: CombinerFn) -> Self {
        self.combiner = Some(combiner);
        self
    }

    pub fn liquidity_manager_factory(mut self, factory: Arc<dyn LiquidityManagerFactory>) -> Self {
        self.lm_factory = Some(factory);
        self
    }

    pub fn confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    pub async fn build(self) -> Result<MultichainConfigTracker> {
        let (master_chain, master_address) = self.master.ok_or(ConfigTrackerError::MissingMaster)?;
        if !self.log_pollers.contains_key(&master_chain) {
            return Err(ConfigTrackerError::MissingMasterLogPoller(master_chain).into());
        }
        let combiner = self.combiner.ok_or(ConfigTrackerError::MissingCombiner)?;
        let lm_factory = self.lm_factory.ok_or(ConfigTrackerError::MissingFactory)?;

        let managers = discover_managers(lm_factory.as_ref(), master_chain, master_address).await?;
        if managers.len() != self.log_pollers.len() {
            return Err(ConfigTrackerError::ChainCountMismatch {
                log_pollers: self.log_pollers.len(),
                managers: managers.len(),
            }
            .into());
        }

        let event_sig = config_set_event_sig();
        for (network, address) in &managers {
            let poller = self
                .log_pollers
                .get(network)
                .ok_or(ConfigTrackerError::UnknownChain(*network))?;
            poller
                .register_filter(LogFilter {
                    name: config_set_filter_name(*network, *address),
                    event_sigs: vec![event_sig],
                    addresses: vec![*address],
                })
                .await
                .with_context(|| format!("register ConfigSet filter on network {}", network))?;
        }

        info!(
            "📡 Config tracker ready: master {} + {} follower chains",
            master_chain,
            managers.len() - 1
        );

        Ok(MultichainConfigTracker {
            master_chain,
            log_pollers: self.log_pollers,
            managers,
            combiner,
            lm_factory,
            confirmations: self.confirmations,
        })
    }
}

/// Breadth-first walk over `get_liquidity_managers`, one manager per network.
async fn discover_managers(
    factory: &dyn LiquidityManagerFactory,
    master_chain: NetworkSelector,
    master_address: Address,
) -> Result<BTreeMap<NetworkSelector, Address>> {
    let mut managers = BTreeMap::new();
    let mut queue = VecDeque::new();
    managers.insert(master_chain, master_address);
    queue.push_back((master_chain, master_address));

    while let Some((network, address)) = queue.pop_front() {
        let lm = factory
            .new_liquidity_manager(network, address)
            .with_context(|| format!("get liquidity manager ({}, {:?})", network, address))?;
        let peers = lm
            .get_liquidity_managers()
            .await
            .with_context(|| format!("get liquidity managers ({}, {:?})", network, address))?;

        for (peer_network, peer_address) in peers {
            match managers.get(&peer_network) {
                Some(known) if *known == peer_address => {}
                Some(known) => {
                    return Err(ConfigTrackerError::DuplicateManager {
                        network: peer_network,
                        first: *known,
                        second: peer_address,
                    }
                    .into())
                }
                None => {
                    managers.insert(peer_network, peer_address);
                    queue.push_back((peer_network, peer_address));
                }
            }
        }
    }

    debug!("Config tracker discovered managers: {:?}", managers);
    Ok(managers)
}

impl MultichainConfigTracker {
    pub fn builder() -> MultichainConfigTrackerBuilder {
        MultichainConfigTrackerBuilder::new()
    }

    pub fn master_chain(&self) -> NetworkSelector {
        self.master_chain
    }

    /// Tracked `(network, liquidity manager)` pairs in network order.
    pub fn managers(&self) -> Vec<(NetworkSelector, Address)> {
        self.managers.iter().map(|(n, a)| (*n, *a)).collect()
    }

    fn poller(&self, network: NetworkSelector) -> Result<&Arc<dyn LogPoller>> {
        self.log_pollers
            .get(&network)
            .ok_or_else(|| ConfigTrackerError::UnknownChain(network).into())
    }

    fn manager(&self, network: NetworkSelector) -> Result<Address> {
        self.managers
            .get(&network)
            .copied()
            .ok_or_else(|| ConfigTrackerError::UnknownChain(network).into())
    }

    async fn config_at(&self, network: NetworkSelector, block: u64) -> Result<ContractConfig> {
        let address = self.manager(network)?;
        let logs = self
            .poller(network)?
            .logs(block, block, config_set_event_sig(), address)
            .await
            .with_context(|| format!("ConfigSet logs on network {} at block {}", network, block))?;
        let log = logs
            .last()
            .ok_or(ConfigTrackerError::MissingLog { network, block })?;
        decode_config_set(network, log)
    }

    pub async fn replay(&self, from_block: u64) -> Result<()> {
        self.replay_chain(self.master_chain, from_block).await
    }

    pub async fn replay_chain(&self, network: NetworkSelector, from_block: u64) -> Result<()> {
        self.poller(network)?
            .replay(from_block)
            .await
            .with_context(|| format!("replay network {} from block {}", network, from_block))
    }
}

#[async_trait]
impl ContractConfigTracker for MultichainConfigTracker {
    async fn latest_config_details(&self) -> Result<ConfigDetails> {
        let address = self.manager(self.master_chain)?;
        let latest = self
            .poller(self.master_chain)?
            .latest_log_by_event_sig_with_confs(config_set_event_sig(), address, self.confirmations)
            .await
            .with_context(|| format!("latest ConfigSet log on master {}", self.master_chain))?;

        match latest {
            Some(log) => {
                let config = decode_config_set(self.master_chain, &log)?;
                Ok(ConfigDetails {
                    changed_in_block: log.block_number,
                    config_digest: config.config_digest,
                })
            }
            None => {
                debug!(
                    "No ConfigSet log on master {} yet, asking the contract",
                    self.master_chain
                );
                let lm = self
                    .lm_factory
                    .new_liquidity_manager(self.master_chain, address)
                    .with_context(|| {
                        format!("get liquidity manager ({}, {:?})", self.master_chain, address)
                    })?;
                lm.get_latest_config_details()
                    .await
                    .context("latest config details from contract")
            }
        }
    }

    async fn latest_config(&self, changed_in_block: u64) -> Result<ContractConfig> {
        let master = self.config_at(self.master_chain, changed_in_block).await?;

        let mut followers = Vec::with_capacity(self.managers.len().saturating_sub(1));
        for network in self.managers.keys().filter(|n| **n != self.master_chain) {
            followers.push(self.config_at(*network, changed_in_block).await?);
        }

        (self.combiner)(master, followers).context("combine chain configs")
    }

    async fn latest_block_height(&self) -> Result<u64> {
        self.poller(self.master_chain)?.latest_block().await
    }
}
