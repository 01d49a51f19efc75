//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{H256, U256};

use liquidity_rebalancer::config_tracker::config_set_event_sig;
use liquidity_rebalancer::discoverer::BaseDiscovererFactory;
use liquidity_rebalancer::graph::XChainRebalancerData;
use liquidity_rebalancer::liquidity_manager::{LiquidityManager, LiquidityManagerFactory, NetworkType};
use liquidity_rebalancer::log_poller::{LogFilter, LogPoller, LogPollerLog};
use liquidity_rebalancer::models::{Address, NetworkSelector, PendingTransfer};
use liquidity_rebalancer::ocr3::ConfigDetails;

pub fn net(n: u64) -> NetworkSelector {
    NetworkSelector(n)
}

pub fn addr(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

/// Manager address used for network `n` throughout the tests.
pub fn manager_addr(n: u64) -> Address {
    addr(0x1000 + n)
}

#[derive(Default)]
pub struct FakeLiquidityManager {
    pub balance: Mutex<U256>,
    pub token: Address,
    pub peers: Mutex<BTreeMap<NetworkSelector, XChainRebalancerData>>,
    pub pending: Mutex<Vec<PendingTransfer>>,
    pub config: Mutex<ConfigDetails>,
    pub fail_balance: AtomicBool,
    pub fail_close: AtomicBool,
    pub closed: AtomicBool,
    pub balance_calls: AtomicUsize,
}

impl FakeLiquidityManager {
    pub fn new(balance: u64) -> Self {
        Self {
            balance: Mutex::new(U256::from(balance)),
            token: addr(0xee),
            ..Default::default()
        }
    }

    /// Adds a peer reachable at `manager_addr(peer)`.
    pub fn with_peer(self, peer: u64) -> Self {
        self.add_peer(peer, manager_addr(peer));
        self
    }

    pub fn add_peer(&self, peer: u64, remote: Address) {
        self.peers.lock().unwrap().insert(
            net(peer),
            XChainRebalancerData {
                remote_rebalancer_address: remote,
                local_bridge_adapter_address: addr(0xb000 + peer),
                remote_token_address: addr(0xee),
            },
        );
    }

    pub fn set_balance(&self, balance: u64) {
        *self.balance.lock().unwrap() = U256::from(balance);
    }

    pub fn set_pending(&self, pending: Vec<PendingTransfer>) {
        *self.pending.lock().unwrap() = pending;
    }
}

#[async_trait]
impl LiquidityManager for FakeLiquidityManager {
    async fn get_balance(&self) -> Result<U256> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(anyhow!("rpc unavailable"));
        }
        Ok(*self.balance.lock().unwrap())
    }

    async fn get_token_address(&self) -> Result<Address> {
        Ok(self.token)
    }

    async fn get_xchain_rebalancers(
        &self,
    ) -> Result<BTreeMap<NetworkSelector, XChainRebalancerData>> {
        Ok(self.peers.lock().unwrap().clone())
    }

    async fn get_pending_transfers(&self) -> Result<Vec<PendingTransfer>> {
        Ok(self.pending.lock().unwrap().clone())
    }

    async fn get_latest_config_details(&self) -> Result<ConfigDetails> {
        Ok(*self.config.lock().unwrap())
    }

    async fn close(&self) -> Result<()> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(anyhow!("close failed"));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFactory {
    managers: Mutex<HashMap<(NetworkSelector, Address), Arc<FakeLiquidityManager>>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `lm` as the manager of network `n` at `manager_addr(n)`.
    pub fn insert(&self, n: u64, lm: FakeLiquidityManager) -> Arc<FakeLiquidityManager> {
        self.insert_at(n, manager_addr(n), lm)
    }

    pub fn insert_at(
        &self,
        n: u64,
        address: Address,
        lm: FakeLiquidityManager,
    ) -> Arc<FakeLiquidityManager> {
        let lm = Arc::new(lm);
        self.managers
            .lock()
            .unwrap()
            .insert((net(n), address), lm.clone());
        lm
    }

    pub fn get(&self, n: u64) -> Arc<FakeLiquidityManager> {
        self.managers
            .lock()
            .unwrap()
            .get(&(net(n), manager_addr(n)))
            .cloned()
            .unwrap()
    }
}

impl LiquidityManagerFactory for FakeFactory {
    fn new_liquidity_manager(
        &self,
        network: NetworkSelector,
        address: Address,
    ) -> Result<Arc<dyn LiquidityManager>> {
        let lm = self
            .managers
            .lock()
            .unwrap()
            .get(&(network, address))
            .cloned()
            .ok_or_else(|| anyhow!("no manager at ({}, {:?})", network, address))?;
        Ok(lm)
    }
}

/// Fully connected, bidirectional set of networks with the given balances.
pub fn mesh(balances: &[(u64, u64)]) -> Arc<FakeFactory> {
    let factory = Arc::new(FakeFactory::new());
    for (n, balance) in balances {
        let mut lm = FakeLiquidityManager::new(*balance);
        for (peer, _) in balances {
            if peer != n {
                lm = lm.with_peer(*peer);
            }
        }
        factory.insert(*n, lm);
    }
    factory
}

/// Discoverer factory treating every listed network as EVM.
pub fn discoverer_factory(
    factory: Arc<FakeFactory>,
    networks: &[u64],
) -> Arc<BaseDiscovererFactory> {
    let types = networks.iter().map(|n| (net(*n), NetworkType::Evm)).collect();
    Arc::new(BaseDiscovererFactory::new(types, factory))
}

#[derive(Default)]
pub struct FakeLogPoller {
    pub logs: Mutex<Vec<LogPollerLog>>,
    pub filters: Mutex<Vec<LogFilter>>,
    pub latest_block: Mutex<u64>,
    pub replays: Mutex<Vec<u64>>,
}

impl FakeLogPoller {
    pub fn new(latest_block: u64) -> Self {
        Self {
            latest_block: Mutex::new(latest_block),
            ..Default::default()
        }
    }

    pub fn push(&self, log: LogPollerLog) {
        self.logs.lock().unwrap().push(log);
    }
}

#[async_trait]
impl LogPoller for FakeLogPoller {
    async fn register_filter(&self, filter: LogFilter) -> Result<()> {
        self.filters.lock().unwrap().push(filter);
        Ok(())
    }

    async fn logs(
        &self,
        from_block: u64,
        to_block: u64,
        event_sig: H256,
        address: Address,
    ) -> Result<Vec<LogPollerLog>> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|l| {
                l.block_number >= from_block
                    && l.block_number <= to_block
                    && l.event_sig() == Some(event_sig)
                    && l.address == address
            })
            .cloned()
            .collect())
    }

    async fn latest_log_by_event_sig_with_confs(
        &self,
        event_sig: H256,
        address: Address,
        confs: u64,
    ) -> Result<Option<LogPollerLog>> {
        let head = *self.latest_block.lock().unwrap();
        let logs = self.logs(0, head.saturating_sub(confs), event_sig, address).await?;
        Ok(logs.into_iter().max_by_key(|l| (l.block_number, l.log_index)))
    }

    async fn latest_block(&self) -> Result<u64> {
        Ok(*self.latest_block.lock().unwrap())
    }

    async fn replay(&self, from_block: u64) -> Result<()> {
        self.replays.lock().unwrap().push(from_block);
        Ok(())
    }
}

/// ABI-encoded `ConfigSet` log as a liquidity manager would emit it.
pub fn config_set_log(
    block: u64,
    address: Address,
    digest: H256,
    transmitters: &[Address],
    f: u8,
) -> LogPollerLog {
    let data = ethers::abi::encode(&[
        Token::Uint(U256::from(block.saturating_sub(1))),
        Token::FixedBytes(digest.as_bytes().to_vec()),
        Token::Uint(U256::from(2u64)),
        Token::Array(
            transmitters
                .iter()
                .map(|t| Token::Address(Address::from_low_u64_be(t.to_low_u64_be() + 0x100)))
                .collect(),
        ),
        Token::Array(transmitters.iter().map(|t| Token::Address(*t)).collect()),
        Token::Uint(U256::from(f)),
        Token::Bytes(vec![0x01]),
        Token::Uint(U256::from(1u64)),
        Token::Bytes(vec![0x02, 0x03]),
    ]);

    LogPollerLog {
        block_number: block,
        address,
        topics: vec![config_set_event_sig()],
        data: data.into(),
        ..Default::default()
    }
}
