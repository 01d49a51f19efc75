use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::contract::LogMeta;
use ethers::providers::Middleware;
use ethers::types::{H256, U256};
use log::{debug, trace};

use crate::contracts::{ILiquidityManager, LiquidityTransferredFilter};
use crate::graph::XChainRebalancerData;
use crate::liquidity_manager::LiquidityManager;
use crate::models::{Address, NetworkSelector, PendingTransfer, Transfer, TransferStatus};
use crate::ocr3::ConfigDetails;

/// Blocks scanned backwards for `LiquidityTransferred` events.
pub const DEFAULT_TRANSFER_LOOKBACK_BLOCKS: u64 = 10_000;

/// Liquidity manager contract on an EVM chain, read through an ethers middleware.
pub struct EvmLiquidityManager<M: Middleware> {
    network: NetworkSelector,
    address: Address,
    client: Arc<M>,
    contract: ILiquidityManager<M>,
    transfer_lookback_blocks: u64,
}

impl<M: Middleware + 'static> EvmLiquidityManager<M> {
    pub fn new(network: NetworkSelector, address: Address, client: Arc<M>) -> Self {
        Self {
            network,
            address,
            contract: ILiquidityManager::new(address, client.clone()),
            client,
            transfer_lookback_blocks: DEFAULT_TRANSFER_LOOKBACK_BLOCKS,
        }
    }

    pub fn with_transfer_lookback(mut self, blocks: u64) -> Self {
        self.transfer_lookback_blocks = blocks;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Peer configured for `chain`, `None` when the contract has it disabled.
    pub async fn cross_chain_rebalancer(&self, chain: u64) -> Result<Option<XChainRebalancerData>> {
        let (remote_rebalancer, local_bridge, remote_token, enabled) = self
            .contract
            .get_cross_chain_rebalancer(chain)
            .call()
            .await
            .with_context(|| {
                format!(
                    "getCrossChainRebalancer({}) on {:?} (network {})",
                    chain, self.address, self.network
                )
            })?;

        if !enabled {
            return Ok(None);
        }
        Ok(Some(XChainRebalancerData {
            remote_rebalancer_address: remote_rebalancer,
            local_bridge_adapter_address: local_bridge,
            remote_token_address: remote_token,
        }))
    }

    /// Outgoing sends are still on their way; incoming ones have landed here.
    fn to_pending_transfer(
        &self,
        event: LiquidityTransferredFilter,
        meta: &LogMeta,
    ) -> Option<PendingTransfer> {
        let from = NetworkSelector(event.from_chain_selector);
        let to = NetworkSelector(event.to_chain_selector);
        let status = if from == self.network && to != self.network {
            TransferStatus::NotReady
        } else if to == self.network && from != self.network {
            TransferStatus::Executed
        } else {
            return None;
        };

        let transfer = Transfer::new(from, to, event.amount).with_bridge_data(event.bridge_specific_data);
        Some(PendingTransfer::new(
            transfer,
            status,
            format!("{:?}-{}", meta.transaction_hash, meta.log_index),
        ))
    }
}

#[async_trait]
impl<M: Middleware + 'static> LiquidityManager for EvmLiquidityManager<M> {
    async fn get_balance(&self) -> Result<U256> {
        self.contract
            .get_liquidity()
            .call()
            .await
            .with_context(|| {
                format!(
                    "getLiquidity on {:?} (network {})",
                    self.address, self.network
                )
            })
    }

    async fn get_token_address(&self) -> Result<Address> {
        self.contract
            .i_local_token()
            .call()
            .await
            .with_context(|| format!("i_localToken on {:?} (network {})", self.address, self.network))
    }

    async fn get_xchain_rebalancers(
        &self,
    ) -> Result<BTreeMap<NetworkSelector, XChainRebalancerData>> {
        let dest_chains = self
            .contract
            .get_supported_dest_chains()
            .call()
            .await
            .with_context(|| {
                format!(
                    "getSupportedDestChains on {:?} (network {})",
                    self.address, self.network
                )
            })?;

        let mut rebalancers = BTreeMap::new();
        for chain in dest_chains {
            match self.cross_chain_rebalancer(chain).await? {
                Some(data) => {
                    rebalancers.insert(NetworkSelector(chain), data);
                }
                None => trace!(
                    "Skipping disabled cross-chain rebalancer {} -> {}",
                    self.network,
                    chain
                ),
            }
        }

        Ok(rebalancers)
    }

    async fn get_pending_transfers(&self) -> Result<Vec<PendingTransfer>> {
        let latest = self
            .client
            .get_block_number()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("block number (network {})", self.network))?
            .as_u64();
        let from_block = latest.saturating_sub(self.transfer_lookback_blocks);

        let events = self
            .contract
            .liquidity_transferred_filter()
            .from_block(from_block)
            .to_block(latest)
            .query_with_meta()
            .await
            .with_context(|| {
                format!(
                    "LiquidityTransferred logs [{}, {}] on {:?} (network {})",
                    from_block, latest, self.address, self.network
                )
            })?;

        let pending: Vec<PendingTransfer> = events
            .into_iter()
            .filter_map(|(event, meta)| self.to_pending_transfer(event, &meta))
            .collect();
        trace!(
            "{} transfer events in [{}, {}] on network {}",
            pending.len(),
            from_block,
            latest,
            self.network
        );
        Ok(pending)
    }

    async fn get_latest_config_details(&self) -> Result<ConfigDetails> {
        let (_config_count, block_number, digest) = self
            .contract
            .latest_config_details()
            .call()
            .await
            .with_context(|| {
                format!(
                    "latestConfigDetails on {:?} (network {})",
                    self.address, self.network
                )
            })?;

        Ok(ConfigDetails {
            changed_in_block: u64::from(block_number),
            config_digest: H256::from(digest),
        })
    }

    async fn close(&self) -> Result<()> {
        debug!(
            "Closing EVM liquidity manager {:?} (network {})",
            self.address, self.network
        );
        Ok(())
    }
}
