//! # Rebalancer Reporting Plugin
//!
//! One OCR3 round, end to end:
//!
//! 1. **Query**: always empty. Every oracle rebuilds its state locally.
//! 2. **Observation**: refresh the graph (full discovery on first use, registry-driven
//!    edge refresh afterwards), sync every network's balance, collect on-chain
//!    pending transfers. Any chain failure aborts the observation.
//! 3. **Outcome**: median liquidity per network, pending transfers seen by f+1 oracles.
//! 4. **Reports**: run the strategy over the agreed state, one report per source network.
//! 5. **Accept / Transmit**: legitimacy checks, then the duplicate-submission guard.
//!
//! The graph, registry and caches are shared across rounds (and across plugin
//! instances built by the same [`PluginFactory`]).

pub mod consensus;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use log::{debug, info, warn};
use tokio::time::timeout;

use crate::discoverer::{read_network_data, DiscovererFactory};
use crate::graph::{Data, LiquidityGraph};
use crate::liquidity_manager::{LiquidityManager, LiquidityManagerFactory};
use crate::metrics;
use crate::models::{
    Address, NetworkLiquidity, NetworkSelector, Observation, Outcome, PendingTransfer,
    ReportMetadata, Transfer, TransferStatus,
};
use crate::ocr3::{
    AttributedObservation, OutcomeContext, Query, Quorum, ReportWithInfo, ReportingPlugin,
};
use crate::registry::Registry;
use crate::settings::PluginSettings;
use crate::strategy::RebalancingStrategy;
use crate::transfer_cache::{settle_confirmed, InflightCache, PendingTransfersCache};

pub use consensus::{big_int_sorted_middle, median_liquidity_per_chain, pending_transfers_with_quorum};

/// State shared by every plugin instance of one node.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    pub graph: Arc<LiquidityGraph>,
    pub registry: Arc<Registry>,
    pub pending_transfers: Arc<PendingTransfersCache>,
    pub inflight: Arc<InflightCache>,
}

#[derive(Debug, Clone)]
pub struct PluginConfig {
    pub f: usize,
    pub root_network: NetworkSelector,
    pub root_address: Address,
    pub close_timeout: Duration,
    pub observation_timeout: Duration,
    pub inflight_ttl: Duration,
}

pub struct Plugin {
    config: PluginConfig,
    state: SharedState,
    lm_factory: Arc<dyn LiquidityManagerFactory>,
    discoverer_factory: Arc<dyn DiscovererFactory>,
    strategy: Arc<dyn RebalancingStrategy>,
    transmit_lock: Mutex<()>,
}

impl Plugin {
    pub fn new(
        config: PluginConfig,
        state: SharedState,
        lm_factory: Arc<dyn LiquidityManagerFactory>,
        discoverer_factory: Arc<dyn DiscovererFactory>,
        strategy: Arc<dyn RebalancingStrategy>,
    ) -> Self {
        Self {
            config,
            state,
            lm_factory,
            discoverer_factory,
            strategy,
            transmit_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn f(&self) -> usize {
        self.config.f
    }

    async fn build_observation(&self) -> Result<Observation> {
        self.sync_graph_edges().await?;
        let liquidity_per_chain = self.sync_graph_balances().await?;
        let pending_transfers = settle_confirmed(self.load_pending_transfers().await?);

        self.state
            .pending_transfers
            .set(pending_transfers.iter().map(|p| p.transfer.clone()).collect());
        let expired = self.state.inflight.expire(&pending_transfers)
            + self.state.inflight.expire_older_than(self.config.inflight_ttl);
        if expired > 0 {
            metrics::increment_inflight_expired(expired);
        }
        metrics::set_cache_size("pending", self.state.pending_transfers.len());
        metrics::set_cache_size("inflight", self.state.inflight.len());

        Ok(Observation::new(liquidity_per_chain, pending_transfers))
    }

    /// Full discovery when the graph is empty, otherwise ask every registered
    /// manager for its peers and add whatever is new.
    async fn sync_graph_edges(&self) -> Result<()> {
        let graph = &self.state.graph;

        if graph.is_empty() {
            let discoverer = self
                .discoverer_factory
                .new_discoverer(self.config.root_network, self.config.root_address)
                .context("new discoverer")?;
            let discovered = discoverer.discover().await.context("discover liquidity graph")?;
            for network in discovered.networks() {
                let address = discovered.get_rebalancer_address(network)?;
                self.state.registry.add(network, address);
            }
            graph.replace(discovered);
            let edges = graph.get_edges().len();
            metrics::set_graph_size(graph.len(), edges);
            info!(
                "🌐 Liquidity graph initialized: {} networks, {} edges",
                graph.len(),
                edges
            );
            return Ok(());
        }

        for (network, address) in self.state.registry.get_all() {
            if !graph.has_network(network) {
                graph.add_network(network, self.read_network(network, address).await?);
            }
            let lm = self
                .lm_factory
                .new_liquidity_manager(network, address)
                .with_context(|| format!("get liquidity manager ({}, {:?})", network, address))?;
            let peers = lm.get_liquidity_managers().await.with_context(|| {
                format!("get liquidity managers ({}, {:?})", network, address)
            })?;

            for (peer_network, peer_address) in peers {
                if !graph.has_network(peer_network) {
                    let data = self.read_network(peer_network, peer_address).await?;
                    graph.add_network(peer_network, data);
                    self.state.registry.add(peer_network, peer_address);
                    info!(
                        "🆕 New network {} (manager {:?}) reached from {}",
                        peer_network, peer_address, network
                    );
                }
                graph.add_connection(network, peer_network)?;
            }
        }
        metrics::set_graph_size(graph.len(), graph.get_edges().len());
        Ok(())
    }

    /// Vertex data for a network first seen after discovery.
    async fn read_network(&self, network: NetworkSelector, address: Address) -> Result<Data> {
        let lm = self
            .lm_factory
            .new_liquidity_manager(network, address)
            .with_context(|| format!("get liquidity manager ({}, {:?})", network, address))?;
        read_network_data(lm.as_ref(), network, address)
            .await
            .with_context(|| format!("read network data ({}, {:?})", network, address))
    }

    /// Liquidity manager instance for every vertex, in network order.
    fn graph_managers(&self) -> Result<Vec<(NetworkSelector, Address, Arc<dyn LiquidityManager>)>> {
        let graph = &self.state.graph;
        let mut managers = Vec::new();
        for network in graph.networks() {
            let address = graph.get_rebalancer_address(network)?;
            let lm = self
                .lm_factory
                .new_liquidity_manager(network, address)
                .with_context(|| format!("get liquidity manager ({}, {:?})", network, address))?;
            managers.push((network, address, lm));
        }
        Ok(managers)
    }

    async fn sync_graph_balances(&self) -> Result<Vec<NetworkLiquidity>> {
        let managers = self.graph_managers()?;

        let balances = try_join_all(managers.iter().map(|(network, address, lm)| async move {
            lm.get_balance()
                .await
                .with_context(|| format!("get balance ({}, {:?})", network, address))
                .map(|balance| NetworkLiquidity::new(*network, balance))
        }))
        .await?;

        for entry in &balances {
            self.state.graph.set_liquidity(entry.network, entry.liquidity);
        }
        Ok(balances)
    }

    async fn load_pending_transfers(&self) -> Result<Vec<PendingTransfer>> {
        let managers = self.graph_managers()?;

        let per_network = try_join_all(managers.iter().map(|(network, address, lm)| async move {
            lm.get_pending_transfers()
                .await
                .with_context(|| format!("get pending transfers ({}, {:?})", network, address))
        }))
        .await?;

        Ok(per_network.into_iter().flatten().collect())
    }

    /// Local graph topology with the agreed liquidities filled in.
    fn outcome_graph(&self, outcome: &Outcome) -> LiquidityGraph {
        let graph = self.state.graph.clone_topology();
        for entry in &outcome.liquidity_per_chain {
            if !graph.set_liquidity(entry.network, entry.liquidity) {
                warn!(
                    "⚠️ Outcome carries liquidity for network {} unknown to this node; skipping",
                    entry.network
                );
            }
        }
        graph
    }

    /// Returns the reason a report is not legitimate, or `None` if it is.
    fn reject_reason(&self, report: &ReportMetadata) -> Option<&'static str> {
        if report.transfers.iter().any(|t| t.from != report.network_id) {
            return Some("foreign_source");
        }
        if !self.state.graph.has_network(report.network_id) {
            return Some("unknown_network");
        }
        if self.state.registry.get(report.network_id) != Some(report.liquidity_manager_address) {
            return Some("manager_mismatch");
        }
        None
    }

    /// Every manager known to the registry or the graph, registry first.
    fn known_managers(&self) -> Result<Vec<(NetworkSelector, Address)>> {
        let mut managers: BTreeMap<NetworkSelector, Address> =
            self.state.registry.get_all().into_iter().collect();
        for network in self.state.graph.networks() {
            if !managers.contains_key(&network) {
                managers.insert(network, self.state.graph.get_rebalancer_address(network)?);
            }
        }
        Ok(managers.into_iter().collect())
    }
}

#[async_trait]
impl ReportingPlugin<ReportMetadata> for Plugin {
    async fn query(&self, _ctx: &OutcomeContext) -> Result<Query> {
        metrics::record_round_step("query");
        Ok(Vec::new())
    }

    async fn observation(&self, ctx: &OutcomeContext, _query: &[u8]) -> Result<Vec<u8>> {
        metrics::record_round_step("observation");
        let started = Instant::now();

        let observation = match timeout(self.config.observation_timeout, self.build_observation()).await {
            Ok(Ok(observation)) => observation,
            Ok(Err(e)) => {
                metrics::increment_observation_failures("chain_error");
                return Err(e.context(format!("observation seq_nr={}", ctx.seq_nr)));
            }
            Err(_) => {
                metrics::increment_observation_failures("timeout");
                return Err(anyhow!(
                    "observation seq_nr={} timed out after {:?}",
                    ctx.seq_nr,
                    self.config.observation_timeout
                ));
            }
        };

        metrics::record_observation_duration(started.elapsed());
        debug!(
            "Observation seq_nr={}: {} networks, {} pending transfers",
            ctx.seq_nr,
            observation.liquidity_per_chain.len(),
            observation.pending_transfers.len()
        );
        observation.encode()
    }

    fn validate_observation(
        &self,
        _ctx: &OutcomeContext,
        _query: &[u8],
        observation: &AttributedObservation,
    ) -> Result<()> {
        Observation::decode(&observation.observation)
            .map(|_| ())
            .map_err(|e| {
                metrics::increment_invalid_observations();
                e.context(format!("invalid observation from oracle {}", observation.observer))
            })
    }

    fn observation_quorum(&self, _ctx: &OutcomeContext, _query: &[u8]) -> Result<Quorum> {
        Ok(Quorum::TwoFPlusOne)
    }

    fn outcome(
        &self,
        ctx: &OutcomeContext,
        _query: &[u8],
        observations: &[AttributedObservation],
    ) -> Result<Vec<u8>> {
        metrics::record_round_step("outcome");

        let mut decoded = Vec::with_capacity(observations.len());
        for attributed in observations {
            match Observation::decode(&attributed.observation) {
                Ok(observation) => decoded.push(observation),
                Err(e) => {
                    metrics::increment_invalid_observations();
                    warn!(
                        "⚠️ Skipping undecodable observation from oracle {}: {:#}",
                        attributed.observer, e
                    );
                }
            }
        }

        let outcome = Outcome::new(
            median_liquidity_per_chain(&decoded),
            pending_transfers_with_quorum(&decoded, self.config.f)?,
        );
        debug!(
            "Outcome seq_nr={}: {} observations, {} networks, {} agreed pending transfers",
            ctx.seq_nr,
            decoded.len(),
            outcome.liquidity_per_chain.len(),
            outcome.pending_transfers.len()
        );
        outcome.encode()
    }

    fn reports(&self, seq_nr: u64, outcome: &[u8]) -> Result<Vec<ReportWithInfo<ReportMetadata>>> {
        metrics::record_round_step("reports");
        let outcome = Outcome::decode(outcome)?;

        let graph = self.outcome_graph(&outcome);
        let pending: Vec<PendingTransfer> = outcome
            .pending_transfers
            .iter()
            .filter(|p| p.status != TransferStatus::Executed)
            .cloned()
            .collect();

        let transfers = self
            .strategy
            .compute_transfers_to_balance(&graph, &pending)
            .with_context(|| format!("compute transfers with {}", self.strategy.name()))?;
        metrics::increment_transfers_proposed(self.strategy.name(), transfers.len() as u64);

        let mut by_source: BTreeMap<NetworkSelector, Vec<Transfer>> = BTreeMap::new();
        for transfer in transfers {
            by_source.entry(transfer.from).or_default().push(transfer);
        }

        let mut reports = Vec::with_capacity(by_source.len());
        for (network, transfers) in by_source {
            let data = self.state.graph.get_data(network)?;
            let info = ReportMetadata::new(
                transfers,
                data.rebalancer_address,
                network,
                data.config_digest,
            );
            reports.push(ReportWithInfo {
                report: info.encode()?,
                info,
            });
        }

        metrics::increment_reports_emitted(reports.len() as u64);
        if !reports.is_empty() {
            info!("📝 seq_nr={} produced {} reports", seq_nr, reports.len());
        }
        Ok(reports)
    }

    async fn should_accept_attested_report(
        &self,
        seq_nr: u64,
        report: &ReportWithInfo<ReportMetadata>,
    ) -> Result<bool> {
        metrics::record_round_step("should_accept");
        let decoded = ReportMetadata::decode(&report.report)
            .with_context(|| format!("decode report seq_nr={}", seq_nr))?;

        if let Some(reason) = self.reject_reason(&decoded) {
            metrics::increment_reports_rejected(reason);
            warn!(
                "⚠️ Refusing report seq_nr={} for network {}: {}",
                seq_nr, decoded.network_id, reason
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn should_transmit_accepted_report(
        &self,
        seq_nr: u64,
        report: &ReportWithInfo<ReportMetadata>,
    ) -> Result<bool> {
        metrics::record_round_step("should_transmit");
        let decoded = ReportMetadata::decode(&report.report)
            .with_context(|| format!("decode report seq_nr={}", seq_nr))?;

        // check-then-add must not interleave with another round's check
        let _guard = self
            .transmit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(dup) = decoded
            .transfers
            .iter()
            .find(|t| self.state.pending_transfers.contains_transfer(t))
        {
            metrics::increment_reports_rejected("already_pending");
            info!(
                "⏭️ Not transmitting seq_nr={}: transfer {} is already pending",
                seq_nr, dup
            );
            return Ok(false);
        }

        self.state.pending_transfers.add(&decoded.transfers);
        self.state.inflight.add(&decoded.transfers);
        metrics::set_cache_size("pending", self.state.pending_transfers.len());
        metrics::set_cache_size("inflight", self.state.inflight.len());
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        let managers = self.known_managers()?;
        let close_all = async {
            let mut errors = Vec::new();
            for (network, address) in managers {
                let closed = match self.lm_factory.new_liquidity_manager(network, address) {
                    Ok(lm) => lm.close().await.with_context(|| {
                        format!("close liquidity manager ({}, {:?})", network, address)
                    }),
                    Err(e) => Err(e.context(format!(
                        "get liquidity manager ({}, {:?})",
                        network, address
                    ))),
                };
                if let Err(e) = closed {
                    warn!("⚠️ {:#}", e);
                    errors.push(format!("{:#}", e));
                }
            }
            if errors.is_empty() {
                Ok(())
            } else {
                Err(anyhow!(errors.join("; ")))
            }
        };

        match timeout(self.config.close_timeout, close_all).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "closing liquidity managers timed out after {:?}",
                self.config.close_timeout
            )),
        }
    }
}

/// Builds plugin instances that share one graph, registry and cache set.
pub struct PluginFactory {
    settings: PluginSettings,
    state: SharedState,
    lm_factory: Arc<dyn LiquidityManagerFactory>,
    discoverer_factory: Arc<dyn DiscovererFactory>,
}

impl PluginFactory {
    pub fn new(
        settings: PluginSettings,
        lm_factory: Arc<dyn LiquidityManagerFactory>,
        discoverer_factory: Arc<dyn DiscovererFactory>,
    ) -> Self {
        Self {
            settings,
            state: SharedState::default(),
            lm_factory,
            discoverer_factory,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// New plugin for an OCR instance tolerating `f` faulty oracles.
    pub fn new_reporting_plugin(&self, f: usize) -> Plugin {
        let strategy = self
            .settings
            .strategy
            .build(&self.settings);
        info!(
            "🔧 New reporting plugin: f={}, strategy={}, root=({}, {:?})",
            f,
            strategy.name(),
            self.settings.root_network,
            self.settings.root_address
        );
        Plugin::new(
            PluginConfig {
                f,
                root_network: self.settings.root_network,
                root_address: self.settings.root_address,
                close_timeout: self.settings.close_timeout(),
                observation_timeout: self.settings.observation_timeout(),
                inflight_ttl: self.settings.inflight_ttl(),
            },
            self.state.clone(),
            self.lm_factory.clone(),
            self.discoverer_factory.clone(),
            strategy,
        )
    }
}
