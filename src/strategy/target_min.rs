use std::collections::BTreeMap;

use anyhow::Result;
use ethers::types::U256;
use log::{debug, trace};

use crate::graph::LiquidityGraph;
use crate::models::{NetworkSelector, PendingTransfer, Transfer, TransferStatus};
use crate::strategy::{liquidity_or_zero, RebalancingStrategy, StrategyError};

/// Deficits at or below this share of the target (in percent) are left alone.
const MIN_DEFICIT_PERCENT: u64 = 5;

/// Balance a network aims for and the floor it must never be drained below.
///
/// A zero target takes the network out of rebalancing altogether.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiquidityTarget {
    pub target: U256,
    pub minimum: U256,
}

impl LiquidityTarget {
    pub fn new(target: U256, minimum: U256) -> Self {
        Self { target, minimum }
    }

    fn enabled(&self) -> bool {
        !self.target.is_zero()
    }
}

/// Tops up networks below their target from networks above theirs.
///
/// Balances are judged as they will be once every non-executed pending transfer
/// lands. Largest deficits are served first, each from the largest surpluses. A
/// first pass only uses direct neighbors; a second pass routes through one
/// intermediate network, which only forwards when doing so keeps its current
/// on-chain balance above its minimum. Otherwise the funds stay at the
/// intermediate for a later round.
#[derive(Debug, Clone, Default)]
pub struct TargetMin {
    default: LiquidityTarget,
    overrides: BTreeMap<NetworkSelector, LiquidityTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Direct,
    ViaIntermediate,
}

/// Per-network balances while transfers are being proposed.
struct Ledger {
    /// On-chain balance minus everything proposed out of the network.
    now: BTreeMap<NetworkSelector, U256>,
    /// Balance once every pending and proposed transfer has landed.
    expected: BTreeMap<NetworkSelector, U256>,
    proposed: BTreeMap<(NetworkSelector, NetworkSelector), U256>,
}

impl Ledger {
    fn now(&self, network: NetworkSelector) -> U256 {
        self.now.get(&network).copied().unwrap_or_default()
    }

    fn expected(&self, network: NetworkSelector) -> U256 {
        self.expected.get(&network).copied().unwrap_or_default()
    }

    fn send(&mut self, from: NetworkSelector, to: NetworkSelector, amount: U256) {
        let now = self.now(from).saturating_sub(amount);
        self.now.insert(from, now);
        let expected = self.expected(from).saturating_sub(amount);
        self.expected.insert(from, expected);
        let expected = self.expected(to).saturating_add(amount);
        self.expected.insert(to, expected);

        let total = self.proposed.entry((from, to)).or_default();
        *total = total.saturating_add(amount);
    }
}

impl TargetMin {
    pub fn new(default: LiquidityTarget, overrides: BTreeMap<NetworkSelector, LiquidityTarget>) -> Self {
        Self { default, overrides }
    }

    fn target_of(&self, network: NetworkSelector) -> LiquidityTarget {
        self.overrides.get(&network).copied().unwrap_or(self.default)
    }

    /// What `network` can give away without dropping under its target once
    /// everything lands, or under its minimum right now.
    fn surplus(&self, ledger: &Ledger, network: NetworkSelector) -> U256 {
        let target = self.target_of(network);
        if !target.enabled() {
            return U256::zero();
        }
        let above_target = ledger.expected(network).saturating_sub(target.target);
        let above_minimum = ledger.now(network).saturating_sub(target.minimum);
        above_target.min(above_minimum)
    }

    fn deficit(&self, ledger: &Ledger, network: NetworkSelector) -> U256 {
        let target = self.target_of(network);
        if !target.enabled() {
            return U256::zero();
        }
        let deficit = target.target.saturating_sub(ledger.expected(network));
        let threshold = target.target.saturating_mul(U256::from(MIN_DEFICIT_PERCENT));
        if deficit.saturating_mul(U256::from(100u64)) > threshold {
            deficit
        } else {
            U256::zero()
        }
    }

    fn ledger(&self, graph: &LiquidityGraph, pending: &[PendingTransfer]) -> Result<Ledger> {
        let mut now = BTreeMap::new();
        for network in graph.networks() {
            now.insert(network, liquidity_or_zero(graph, network)?);
        }
        let mut expected = now.clone();
        for p in pending.iter().filter(|p| p.status != TransferStatus::Executed) {
            if let Some(balance) = expected.get_mut(&p.to) {
                *balance = balance.saturating_add(p.amount);
            }
        }
        Ok(Ledger {
            now,
            expected,
            proposed: BTreeMap::new(),
        })
    }

    fn round(&self, graph: &LiquidityGraph, networks: &[NetworkSelector], ledger: &mut Ledger, route: Route) {
        let mut needy: Vec<(NetworkSelector, U256)> = networks
            .iter()
            .map(|n| (*n, self.deficit(ledger, *n)))
            .filter(|(_, deficit)| !deficit.is_zero())
            .collect();
        needy.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        for (dest, _) in needy {
            let remaining = self.deficit(ledger, dest);
            if remaining.is_zero() {
                continue;
            }
            match route {
                Route::Direct => self.fund_directly(graph, networks, ledger, dest, remaining),
                Route::ViaIntermediate => {
                    self.fund_via_intermediate(graph, networks, ledger, dest, remaining)
                }
            }
        }
    }

    fn fund_directly(
        &self,
        graph: &LiquidityGraph,
        networks: &[NetworkSelector],
        ledger: &mut Ledger,
        dest: NetworkSelector,
        mut remaining: U256,
    ) {
        let mut sources: Vec<(NetworkSelector, U256)> = networks
            .iter()
            .filter(|s| **s != dest && graph.has_connection(**s, dest))
            .map(|s| (*s, self.surplus(ledger, *s)))
            .filter(|(_, surplus)| !surplus.is_zero())
            .collect();
        sources.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        for (source, surplus) in sources {
            if remaining.is_zero() {
                break;
            }
            let amount = surplus.min(remaining);
            ledger.send(source, dest, amount);
            remaining -= amount;
        }
    }

    fn fund_via_intermediate(
        &self,
        graph: &LiquidityGraph,
        networks: &[NetworkSelector],
        ledger: &mut Ledger,
        dest: NetworkSelector,
        mut remaining: U256,
    ) {
        let mut routes: Vec<(NetworkSelector, NetworkSelector, U256)> = Vec::new();
        for hop in networks.iter().copied() {
            if hop == dest || !self.target_of(hop).enabled() || !graph.has_connection(hop, dest) {
                continue;
            }
            for source in networks.iter().copied() {
                if source == dest || source == hop || !graph.has_connection(source, hop) {
                    continue;
                }
                let surplus = self.surplus(ledger, source);
                if !surplus.is_zero() {
                    routes.push((source, hop, surplus));
                }
            }
        }
        routes.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)).then(a.1.cmp(&b.1)));

        for (source, hop, _) in routes {
            if remaining.is_zero() {
                break;
            }
            let surplus = self.surplus(ledger, source);
            if surplus.is_zero() {
                continue;
            }
            let amount = surplus.min(remaining);
            ledger.send(source, hop, amount);

            let hop_now = ledger.now(hop);
            if hop_now >= amount && hop_now - amount >= self.target_of(hop).minimum {
                ledger.send(hop, dest, amount);
            } else {
                trace!(
                    "Holding {} at {} on its way to {}: forwarding now would breach the minimum",
                    amount,
                    hop,
                    dest
                );
            }
            remaining -= amount;
        }
    }
}

impl RebalancingStrategy for TargetMin {
    fn name(&self) -> &'static str {
        "target_min"
    }

    fn compute_transfers_to_balance(
        &self,
        graph: &LiquidityGraph,
        pending: &[PendingTransfer],
    ) -> Result<Vec<Transfer>> {
        let networks = graph.networks();
        if networks.is_empty() {
            return Err(StrategyError::EmptyGraph.into());
        }

        let mut ledger = self.ledger(graph, pending)?;
        self.round(graph, &networks, &mut ledger, Route::Direct);
        self.round(graph, &networks, &mut ledger, Route::ViaIntermediate);

        let transfers: Vec<Transfer> = ledger
            .proposed
            .into_iter()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|((from, to), amount)| Transfer::new(from, to, amount))
            .collect();
        debug!("target_min proposes {} transfers", transfers.len());
        Ok(transfers)
    }
}
