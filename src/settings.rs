use config::{Config, ConfigError, File, FileFormat};
use ethers::types::U256;
use log::warn;
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::time::Duration;

use crate::liquidity_manager::NetworkType;
use crate::models::{Address, NetworkSelector};
use crate::strategy::target_min::{LiquidityTarget, TargetMin};
use crate::strategy::StrategyKind;

#[derive(Debug, Deserialize, Clone)]
pub struct PluginSettings {
    /// Network holding the liquidity manager discovery starts from.
    pub root_network: NetworkSelector,
    pub root_address: Address,
    /// Byzantine faults tolerated when no on-chain config is available yet.
    #[serde(default = "default_f")]
    pub f: usize,
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    #[serde(default = "default_observation_timeout_ms")]
    pub observation_timeout_ms: u64,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default = "default_random_max_transfers")]
    pub random_max_transfers: usize,
    #[serde(default)]
    pub target_min: TargetMinSettings,
    /// Inflight transfers nobody confirmed within this window are forgotten.
    #[serde(default = "default_inflight_ttl_seconds")]
    pub inflight_ttl_seconds: u64,
}

fn default_f() -> usize {
    1
}
fn default_close_timeout_ms() -> u64 {
    10_000
}
fn default_observation_timeout_ms() -> u64 {
    30_000
}
fn default_random_max_transfers() -> usize {
    5
}
fn default_inflight_ttl_seconds() -> u64 {
    3_600
}

impl PluginSettings {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn observation_timeout(&self) -> Duration {
        Duration::from_millis(self.observation_timeout_ms)
    }

    pub fn inflight_ttl(&self) -> Duration {
        Duration::from_secs(self.inflight_ttl_seconds)
    }
}

/// Targets for the `target_min` strategy. Amounts are token units, written as
/// integers or as decimal strings once they outgrow 64 bits.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TargetMinSettings {
    #[serde(default, deserialize_with = "amount")]
    pub default_target: U256,
    #[serde(default, deserialize_with = "amount")]
    pub default_minimum: U256,
    #[serde(default)]
    pub networks: Vec<LiquidityTargetSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LiquidityTargetSettings {
    pub selector: NetworkSelector,
    /// Zero takes the network out of rebalancing.
    #[serde(deserialize_with = "amount")]
    pub target: U256,
    #[serde(default, deserialize_with = "amount")]
    pub minimum: U256,
}

impl TargetMinSettings {
    pub fn build(&self) -> TargetMin {
        let overrides: BTreeMap<NetworkSelector, LiquidityTarget> = self
            .networks
            .iter()
            .map(|n| (n.selector, LiquidityTarget::new(n.target, n.minimum)))
            .collect();
        TargetMin::new(
            LiquidityTarget::new(self.default_target, self.default_minimum),
            overrides,
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Number(u64),
    Text(String),
}

fn amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
    match RawAmount::deserialize(deserializer)? {
        RawAmount::Number(n) => Ok(U256::from(n)),
        RawAmount::Text(s) => U256::from_dec_str(s.trim()).map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConfigTrackerSettings {
    /// Chain whose `ConfigSet` events drive the combined OCR config.
    pub master_chain: NetworkSelector,
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,
    #[serde(default = "default_refresh_jitter_ms")]
    pub refresh_jitter_ms: u64,
    /// How far back the RPC log poller searches for the latest `ConfigSet`.
    #[serde(default = "default_log_lookback_blocks")]
    pub log_lookback_blocks: u64,
}

fn default_confirmations() -> u64 {
    1
}
fn default_refresh_interval_seconds() -> u64 {
    15
}
fn default_refresh_jitter_ms() -> u64 {
    1_000
}
fn default_log_lookback_blocks() -> u64 {
    10_000
}

impl ConfigTrackerSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    pub fn refresh_jitter(&self) -> Duration {
        Duration::from_millis(self.refresh_jitter_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainSettings {
    pub selector: NetworkSelector,
    #[serde(default = "default_network_type")]
    pub network_type: NetworkType,
    pub rpc_url: String,
}

fn default_network_type() -> NetworkType {
    NetworkType::Evm
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metrics {
    #[serde(default = "default_false")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen_addr")]
    pub listen_addr: String,
}

fn default_false() -> bool {
    false
}
fn default_metrics_listen_addr() -> String {
    "0.0.0.0:9090".to_string()
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            enabled: default_false(),
            listen_addr: default_metrics_listen_addr(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub plugin: PluginSettings,
    pub config_tracker: ConfigTrackerSettings,
    #[serde(default)]
    pub chains: Vec<ChainSettings>,
    #[serde(default)]
    pub metrics: Metrics,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_path("Config.toml")
    }

    pub fn from_path(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Parses settings from an in-memory TOML document. No environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        // REBALANCER_ROOT_ADDRESS=0x...
        if let Ok(raw) = env::var("REBALANCER_ROOT_ADDRESS") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                match trimmed.parse::<Address>() {
                    Ok(addr) => self.plugin.root_address = addr,
                    Err(e) => warn!("Ignoring REBALANCER_ROOT_ADDRESS={}: {}", trimmed, e),
                }
            }
        }

        // REBALANCER_RPC_URLS={"<selector>": "<url>", ...}
        if let Ok(raw) = env::var("REBALANCER_RPC_URLS") {
            self.apply_rpc_url_overrides(&raw);
        }
    }

    /// Overrides `rpc_url` of configured chains from a JSON object keyed by selector.
    /// Unknown selectors and malformed input are logged and skipped.
    pub fn apply_rpc_url_overrides(&mut self, raw: &str) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return;
        }
        let map = match serde_json::from_str::<HashMap<String, String>>(trimmed) {
            Ok(map) => map,
            Err(e) => {
                warn!("Failed to parse REBALANCER_RPC_URLS as JSON: {}", e);
                return;
            }
        };
        for (selector, url) in map {
            let selector = match selector.trim().parse::<u64>() {
                Ok(s) => NetworkSelector(s),
                Err(_) => {
                    warn!("Ignoring RPC override for non-numeric selector {:?}", selector);
                    continue;
                }
            };
            if url.trim().is_empty() {
                continue;
            }
            match self.chains.iter_mut().find(|c| c.selector == selector) {
                Some(chain) => chain.rpc_url = url.trim().to_string(),
                None => warn!("Ignoring RPC override for unconfigured network {}", selector),
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.selector) {
                return Err(ConfigError::Message(format!(
                    "network {} configured more than once",
                    chain.selector
                )));
            }
        }
        for target in &self.plugin.target_min.networks {
            if target.minimum > target.target && !target.target.is_zero() {
                return Err(ConfigError::Message(format!(
                    "network {} has a minimum above its target",
                    target.selector
                )));
            }
        }
        if !self.chains.is_empty() && !seen.contains(&self.plugin.root_network) {
            return Err(ConfigError::Message(format!(
                "root network {} has no [[chains]] entry",
                self.plugin.root_network
            )));
        }
        Ok(())
    }

    pub fn chain(&self, selector: NetworkSelector) -> Option<&ChainSettings> {
        self.chains.iter().find(|c| c.selector == selector)
    }
}
