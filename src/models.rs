//! # Models
//!
//! Shared data types for the rebalancing engine: network identifiers, transfers,
//! per-round observations/outcomes and report metadata.
//!
//! Every payload that crosses process boundaries (observations, outcomes, reports)
//! is JSON-encoded. Field order is fixed by the struct definitions, which makes the
//! encoding canonical: two nodes holding equal values produce identical bytes, and
//! content hashes computed over those bytes can be compared across the network.

use std::fmt;
use std::ops::Deref;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ethers::types::{Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use ethers::types::Address;

/// Hash identifying one on-chain OCR configuration.
pub type ConfigDigest = H256;

/// Opaque identifier of one blockchain network.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NetworkSelector(pub u64);

impl NetworkSelector {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NetworkSelector {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for NetworkSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directed connection: `source` can send liquidity to `dest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: NetworkSelector,
    pub dest: NetworkSelector,
}

impl Edge {
    pub fn new(source: NetworkSelector, dest: NetworkSelector) -> Self {
        Self { source, dest }
    }
}

/// A cross-chain liquidity movement.
///
/// Two transfers are equal when they move the same `amount` between the same pair
/// of networks; timestamps and bridge payloads are deliberately ignored so that
/// the same instruction observed at different times is recognised as one transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub from: NetworkSelector,
    pub to: NetworkSelector,
    pub amount: U256,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub bridge_data: Bytes,
    #[serde(default)]
    pub native_bridge_fee: U256,
}

impl Transfer {
    /// Builds a transfer with a zero timestamp, empty bridge payload and no fee.
    ///
    /// Strategies use this constructor: their output must not depend on the wall clock.
    pub fn new(from: NetworkSelector, to: NetworkSelector, amount: U256) -> Self {
        Self {
            from,
            to,
            amount,
            created_at: DateTime::<Utc>::default(),
            bridge_data: Bytes::default(),
            native_bridge_fee: U256::zero(),
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_bridge_data(mut self, bridge_data: impl Into<Bytes>) -> Self {
        self.bridge_data = bridge_data.into();
        self
    }

    pub fn with_native_bridge_fee(mut self, fee: U256) -> Self {
        self.native_bridge_fee = fee;
        self
    }
}

impl PartialEq for Transfer {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from && self.to == other.to && self.amount == other.amount
    }
}

impl Eq for Transfer {}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.from, self.to, self.amount)
    }
}

/// Lifecycle of a transfer that has been submitted on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferStatus {
    NotReady,
    Ready,
    Finalized,
    Executed,
}

impl TransferStatus {
    /// Finalized or executed transfers are confirmed on-chain and no longer inflight.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TransferStatus::Finalized | TransferStatus::Executed)
    }
}

/// A transfer known to the chain but not yet fully settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransfer {
    #[serde(flatten)]
    pub transfer: Transfer,
    pub status: TransferStatus,
    #[serde(default)]
    pub id: String,
}

impl PendingTransfer {
    pub fn new(transfer: Transfer, status: TransferStatus, id: impl Into<String>) -> Self {
        Self {
            transfer,
            status,
            id: id.into(),
        }
    }

    /// SHA-256 over the canonical JSON encoding. Used for quorum voting in Outcome.
    pub fn content_hash(&self) -> Result<[u8; 32]> {
        let encoded = serde_json::to_vec(self).context("encode pending transfer")?;
        Ok(Sha256::digest(&encoded).into())
    }
}

impl Deref for PendingTransfer {
    type Target = Transfer;

    fn deref(&self) -> &Self::Target {
        &self.transfer
    }
}

/// Liquidity held by the liquidity manager of one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkLiquidity {
    pub network: NetworkSelector,
    pub liquidity: U256,
}

impl NetworkLiquidity {
    pub fn new(network: NetworkSelector, liquidity: U256) -> Self {
        Self { network, liquidity }
    }
}

/// One oracle's view of the world for a single round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    #[serde(default)]
    pub liquidity_per_chain: Vec<NetworkLiquidity>,
    #[serde(default)]
    pub pending_transfers: Vec<PendingTransfer>,
}

impl Observation {
    pub fn new(
        liquidity_per_chain: Vec<NetworkLiquidity>,
        pending_transfers: Vec<PendingTransfer>,
    ) -> Self {
        Self {
            liquidity_per_chain,
            pending_transfers,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("encode observation")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("decode observation")
    }
}

/// The consensus-reduced state of a round: median liquidity per chain and the
/// pending transfers reported by at least f+1 oracles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    #[serde(default)]
    pub liquidity_per_chain: Vec<NetworkLiquidity>,
    #[serde(default)]
    pub pending_transfers: Vec<PendingTransfer>,
}

impl Outcome {
    pub fn new(
        liquidity_per_chain: Vec<NetworkLiquidity>,
        pending_transfers: Vec<PendingTransfer>,
    ) -> Self {
        Self {
            liquidity_per_chain,
            pending_transfers,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("encode outcome")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("decode outcome")
    }
}

/// Contents of one report, destined for the liquidity manager of `network_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    #[serde(default)]
    pub transfers: Vec<Transfer>,
    #[serde(default)]
    pub liquidity_manager_address: Address,
    #[serde(default, rename = "networkID")]
    pub network_id: NetworkSelector,
    #[serde(default)]
    pub config_digest: ConfigDigest,
}

impl ReportMetadata {
    pub fn new(
        transfers: Vec<Transfer>,
        liquidity_manager_address: Address,
        network_id: NetworkSelector,
        config_digest: ConfigDigest,
    ) -> Self {
        Self {
            transfers,
            liquidity_manager_address,
            network_id,
            config_digest,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("encode report")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("decode report")
    }
}
