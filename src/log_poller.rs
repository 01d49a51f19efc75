//! # Log Poller
//!
//! Per-chain access to contract event logs, as consumed by the config tracker.
//!
//! [`LogPoller`] is the seam: nodes that run an indexing log-poller service plug it
//! in behind this trait, and [`RpcLogPoller`] covers deployments that only have a
//! JSON-RPC endpoint by answering every query with `eth_getLogs`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::abi::RawLog;
use ethers::providers::Middleware;
use ethers::types::{Bytes, Filter, Log, H256};
use log::{debug, info};

use crate::models::{Address, NetworkSelector};

/// One event log, flattened to what the node needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogPollerLog {
    pub block_number: u64,
    pub block_hash: H256,
    pub tx_hash: H256,
    pub log_index: u64,
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Bytes,
}

impl LogPollerLog {
    pub fn event_sig(&self) -> Option<H256> {
        self.topics.first().copied()
    }

    pub fn to_raw_log(&self) -> RawLog {
        RawLog {
            topics: self.topics.clone(),
            data: self.data.to_vec(),
        }
    }
}

impl From<Log> for LogPollerLog {
    fn from(log: Log) -> Self {
        Self {
            block_number: log.block_number.map(|b| b.as_u64()).unwrap_or_default(),
            block_hash: log.block_hash.unwrap_or_default(),
            tx_hash: log.transaction_hash.unwrap_or_default(),
            log_index: log.log_index.map(|i| i.low_u64()).unwrap_or_default(),
            address: log.address,
            topics: log.topics,
            data: log.data,
        }
    }
}

/// Named subscription: the poller only answers for registered (event, address) pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub name: String,
    pub event_sigs: Vec<H256>,
    pub addresses: Vec<Address>,
}

impl LogFilter {
    pub fn covers(&self, event_sig: H256, address: Address) -> bool {
        self.event_sigs.contains(&event_sig) && self.addresses.contains(&address)
    }
}

#[async_trait]
pub trait LogPoller: Send + Sync {
    async fn register_filter(&self, filter: LogFilter) -> Result<()>;

    /// Logs in `[from_block, to_block]`, ordered by (block, log index).
    async fn logs(
        &self,
        from_block: u64,
        to_block: u64,
        event_sig: H256,
        address: Address,
    ) -> Result<Vec<LogPollerLog>>;

    /// Most recent log with at least `confs` confirmations, if any.
    async fn latest_log_by_event_sig_with_confs(
        &self,
        event_sig: H256,
        address: Address,
        confs: u64,
    ) -> Result<Option<LogPollerLog>>;

    async fn latest_block(&self) -> Result<u64>;

    /// Reprocess history starting at `from_block`.
    async fn replay(&self, from_block: u64) -> Result<()>;
}

/// Log poller backed directly by a JSON-RPC provider.
pub struct RpcLogPoller<M: Middleware> {
    network: NetworkSelector,
    provider: Arc<M>,
    filters: RwLock<BTreeMap<String, LogFilter>>,
    lookback_blocks: u64,
    replay_from: Mutex<Option<u64>>,
}

impl<M: Middleware + 'static> RpcLogPoller<M> {
    /// `lookback_blocks` bounds how far back `latest_log_by_event_sig_with_confs`
    /// searches unless a replay asked for more.
    pub fn new(network: NetworkSelector, provider: Arc<M>, lookback_blocks: u64) -> Self {
        Self {
            network,
            provider,
            filters: RwLock::new(BTreeMap::new()),
            lookback_blocks,
            replay_from: Mutex::new(None),
        }
    }

    fn ensure_registered(&self, event_sig: H256, address: Address) -> Result<()> {
        let filters = self.filters.read().unwrap_or_else(PoisonError::into_inner);
        if filters.values().any(|f| f.covers(event_sig, address)) {
            Ok(())
        } else {
            Err(anyhow!(
                "no filter registered on network {} for event {:?} at {:?}",
                self.network,
                event_sig,
                address
            ))
        }
    }

    async fn fetch(
        &self,
        from_block: u64,
        to_block: u64,
        event_sig: H256,
        address: Address,
    ) -> Result<Vec<LogPollerLog>> {
        let filter = Filter::new()
            .from_block(from_block)
            .to_block(to_block)
            .topic0(event_sig)
            .address(address);
        let raw = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| anyhow!("eth_getLogs on network {}: {}", self.network, e))?;

        let mut logs: Vec<LogPollerLog> = raw.into_iter().map(LogPollerLog::from).collect();
        logs.sort_by_key(|l| (l.block_number, l.log_index));
        Ok(logs)
    }
}

#[async_trait]
impl<M: Middleware + 'static> LogPoller for RpcLogPoller<M> {
    async fn register_filter(&self, filter: LogFilter) -> Result<()> {
        debug!(
            "Registering log filter {} on network {} ({} addresses)",
            filter.name,
            self.network,
            filter.addresses.len()
        );
        self.filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(filter.name.clone(), filter);
        Ok(())
    }

    async fn logs(
        &self,
        from_block: u64,
        to_block: u64,
        event_sig: H256,
        address: Address,
    ) -> Result<Vec<LogPollerLog>> {
        self.ensure_registered(event_sig, address)?;
        self.fetch(from_block, to_block, event_sig, address).await
    }

    async fn latest_log_by_event_sig_with_confs(
        &self,
        event_sig: H256,
        address: Address,
        confs: u64,
    ) -> Result<Option<LogPollerLog>> {
        self.ensure_registered(event_sig, address)?;

        let latest = self.latest_block().await?;
        let to_block = latest.saturating_sub(confs);
        let mut from_block = to_block.saturating_sub(self.lookback_blocks);
        if let Some(replay_from) = self
            .replay_from
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            from_block = from_block.min(replay_from);
        }

        let logs = self.fetch(from_block, to_block, event_sig, address).await?;
        Ok(logs.into_iter().last())
    }

    async fn latest_block(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|b| b.as_u64())
            .map_err(|e| anyhow!("eth_blockNumber on network {}: {}", self.network, e))
    }

    async fn replay(&self, from_block: u64) -> Result<()> {
        let latest = self.latest_block().await.context("replay")?;
        if from_block > latest {
            return Err(anyhow!(
                "cannot replay network {} from block {}: latest is {}",
                self.network,
                from_block,
                latest
            ));
        }
        info!(
            "🔁 Replaying logs on network {} from block {}",
            self.network, from_block
        );
        *self.replay_from.lock().unwrap_or_else(PoisonError::into_inner) = Some(from_block);
        Ok(())
    }
}
