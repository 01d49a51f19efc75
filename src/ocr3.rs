//! # OCR3 Interface
//!
//! The callback surface this crate exposes to the surrounding OCR3 runtime: the
//! reporting-plugin round callbacks and the contract-config-tracker. The runtime
//! owns the transport, signing and leader election; these types only carry the
//! bytes each callback produces or consumes.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::ConfigDigest;

/// Leader-supplied query bytes.
pub type Query = Vec<u8>;

/// Round context handed to Query/Observation/Outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeContext {
    pub seq_nr: u64,
    pub previous_outcome: Vec<u8>,
}

/// An observation together with the oracle that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributedObservation {
    pub observation: Vec<u8>,
    pub observer: u8,
}

/// How many observations the runtime must collect before calling Outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quorum {
    FPlusOne,
    TwoFPlusOne,
    NMinusF,
    All,
}

impl Quorum {
    /// Number of observations required with `n` oracles tolerating `f` faults.
    pub fn required(&self, n: usize, f: usize) -> usize {
        match self {
            Quorum::FPlusOne => f + 1,
            Quorum::TwoFPlusOne => 2 * f + 1,
            Quorum::NMinusF => n.saturating_sub(f),
            Quorum::All => n,
        }
    }
}

/// Serialized report plus the decoded info it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportWithInfo<I> {
    pub report: Vec<u8>,
    pub info: I,
}

/// Where and which configuration is currently active on a contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigDetails {
    pub changed_in_block: u64,
    pub config_digest: ConfigDigest,
}

/// Full OCR configuration as emitted by a `ConfigSet` event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractConfig {
    pub config_digest: ConfigDigest,
    pub config_count: u64,
    pub signers: Vec<Vec<u8>>,
    pub transmitters: Vec<String>,
    pub f: u8,
    pub onchain_config: Vec<u8>,
    pub offchain_config_version: u64,
    pub offchain_config: Vec<u8>,
}

/// Round callbacks of an OCR3 reporting plugin.
///
/// The runtime calls the callbacks of one round sequentially; callbacks of
/// different rounds may overlap, so implementations must be safe to share.
#[async_trait]
pub trait ReportingPlugin<I: Send + Sync + 'static>: Send + Sync {
    async fn query(&self, ctx: &OutcomeContext) -> Result<Query>;

    async fn observation(&self, ctx: &OutcomeContext, query: &[u8]) -> Result<Vec<u8>>;

    fn validate_observation(
        &self,
        ctx: &OutcomeContext,
        query: &[u8],
        observation: &AttributedObservation,
    ) -> Result<()>;

    fn observation_quorum(&self, ctx: &OutcomeContext, query: &[u8]) -> Result<Quorum>;

    fn outcome(
        &self,
        ctx: &OutcomeContext,
        query: &[u8],
        observations: &[AttributedObservation],
    ) -> Result<Vec<u8>>;

    fn reports(&self, seq_nr: u64, outcome: &[u8]) -> Result<Vec<ReportWithInfo<I>>>;

    async fn should_accept_attested_report(
        &self,
        seq_nr: u64,
        report: &ReportWithInfo<I>,
    ) -> Result<bool>;

    async fn should_transmit_accepted_report(
        &self,
        seq_nr: u64,
        report: &ReportWithInfo<I>,
    ) -> Result<bool>;

    async fn close(&self) -> Result<()>;
}

/// Source of the OCR configuration the runtime should run with.
#[async_trait]
pub trait ContractConfigTracker: Send + Sync {
    async fn latest_config_details(&self) -> Result<ConfigDetails>;

    async fn latest_config(&self, changed_in_block: u64) -> Result<ContractConfig>;

    async fn latest_block_height(&self) -> Result<u64>;
}
