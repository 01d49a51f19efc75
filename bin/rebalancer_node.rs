//! # Rebalancer Node
//!
//! Hosts the liquidity rebalancing plugin for one oracle.
//!
//! ## Overview
//!
//! On startup this binary:
//! - Loads `Config.toml` (or `--config`) plus environment overrides
//! - Builds one RPC client per configured chain
//! - Discovers the liquidity graph from the configured root manager
//! - Builds the multichain config tracker and keeps the latest config details fresh
//! - Creates the reporting plugin with `f` taken from the on-chain config
//!
//! The OCR runtime drives the plugin callbacks. On Ctrl+C the refresher stops and
//! every liquidity manager is closed within the configured close timeout.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin rebalancer_node -- --config Config.toml
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use ethers::prelude::{Http, Provider};
use liquidity_rebalancer::{
    cached_value::{FetchFn, FetchFuture, PeriodicRefresher},
    config_tracker::{combine_transmitters, CombinerFn, MultichainConfigTracker},
    discoverer::{BaseDiscovererFactory, DiscovererFactory},
    liquidity_manager::{BaseLiquidityManagerFactory, ChainClient, NetworkType},
    log_poller::{LogPoller, RpcLogPoller},
    metrics,
    models::NetworkSelector,
    ocr3::{ConfigDetails, ContractConfigTracker, ReportingPlugin},
    plugin::PluginFactory,
    settings::Settings,
};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, Duration};

#[derive(Parser)]
#[clap(rename_all = "kebab-case", author, version)]
struct Args {
    /// Settings file
    #[clap(env = "REBALANCER_CONFIG", long, default_value = "Config.toml")]
    config: String,
    /// Run discovery, print the graph and exit
    #[clap(long)]
    discover_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    env_logger::init();

    let args = Args::parse();

    println!("🚀 Starting Rebalancer Node");
    println!("═══════════════════════════════════════════════════════════════════\n");

    // 1. Load settings
    let settings = Settings::from_path(&args.config)
        .with_context(|| format!("load settings from {}", args.config))?;
    println!("✅ Settings loaded ({} chains)", settings.chains.len());

    // 2. Metrics
    #[cfg(feature = "observability")]
    if settings.metrics.enabled {
        let addr: std::net::SocketAddr = settings
            .metrics
            .listen_addr
            .parse()
            .context("metrics.listen_addr")?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("install prometheus exporter")?;
        println!("✅ Metrics exporter listening on {}", addr);
    }
    metrics::describe_metrics();
    metrics::set_up();

    // 3. Chain clients
    let mut clients: HashMap<NetworkSelector, ChainClient> = HashMap::new();
    let mut providers: HashMap<NetworkSelector, Arc<Provider<Http>>> = HashMap::new();
    for chain in &settings.chains {
        let client = match chain.network_type {
            NetworkType::Evm => {
                let provider = Arc::new(
                    Provider::<Http>::try_from(chain.rpc_url.as_str())
                        .with_context(|| format!("rpc url for network {}", chain.selector))?,
                );
                providers.insert(chain.selector, provider.clone());
                ChainClient::Evm(provider)
            }
            NetworkType::Solana => ChainClient::Solana {
                rpc_url: chain.rpc_url.clone(),
            },
        };
        clients.insert(chain.selector, client);
    }
    let network_types = clients
        .iter()
        .map(|(selector, client)| (*selector, client.network_type()))
        .collect();
    let lm_factory = Arc::new(BaseLiquidityManagerFactory::new(clients));
    let discoverer_factory = Arc::new(BaseDiscovererFactory::new(network_types, lm_factory.clone()));
    println!("✅ Chain clients created");

    // 4. Initial discovery
    let root_network = settings.plugin.root_network;
    let root_address = settings.plugin.root_address;
    let graph = discoverer_factory
        .new_discoverer(root_network, root_address)?
        .discover()
        .await
        .context("initial discovery")?;
    println!(
        "✅ Liquidity graph discovered: {} networks, {} edges",
        graph.len(),
        graph.get_edges().len()
    );
    for edge in graph.get_edges() {
        info!("   {} -> {}", edge.source, edge.dest);
    }
    if args.discover_only {
        return Ok(());
    }

    // 5. Config tracker over every discovered chain
    let master_chain = settings.config_tracker.master_chain;
    let master_address = graph
        .get_rebalancer_address(master_chain)
        .context("master chain is not part of the liquidity graph")?;
    let combiner: CombinerFn = Arc::new(combine_transmitters);
    let mut builder = MultichainConfigTracker::builder()
        .master(master_chain, master_address)
        .combiner(combiner)
        .liquidity_manager_factory(lm_factory.clone())
        .confirmations(settings.config_tracker.confirmations);
    for network in graph.networks() {
        match providers.get(&network) {
            Some(provider) => {
                let poller: Arc<dyn LogPoller> = Arc::new(RpcLogPoller::new(
                    network,
                    provider.clone(),
                    settings.config_tracker.log_lookback_blocks,
                ));
                builder = builder.log_poller(network, poller);
            }
            None => warn!("⚠️ No EVM provider for network {}; its config is not tracked", network),
        }
    }
    let tracker = Arc::new(builder.build().await.context("build config tracker")?);
    println!("✅ Config tracker ready (master {})", master_chain);

    // 6. Plugin with f from the current on-chain config
    let details = tracker.latest_config_details().await?;
    let f = match tracker.latest_config(details.changed_in_block).await {
        Ok(config) => config.f as usize,
        Err(e) => {
            warn!(
                "⚠️ No combined config at block {} ({:#}); using f={} from settings",
                details.changed_in_block, e, settings.plugin.f
            );
            settings.plugin.f
        }
    };
    let plugin_factory = PluginFactory::new(
        settings.plugin.clone(),
        lm_factory.clone(),
        discoverer_factory.clone(),
    );
    let state = plugin_factory.state().clone();
    for network in graph.networks() {
        state
            .registry
            .add(network, graph.get_rebalancer_address(network)?);
    }
    state.graph.replace(graph);
    let plugin = plugin_factory.new_reporting_plugin(f);
    println!("✅ Reporting plugin ready (f={})", plugin.f());

    // 7. Keep config details fresh
    let fetch_tracker = tracker.clone();
    let fetch: FetchFn<ConfigDetails> = Arc::new(move || {
        let tracker = fetch_tracker.clone();
        Box::pin(async move { tracker.latest_config_details().await }) as FetchFuture<ConfigDetails>
    });
    let refresher = PeriodicRefresher::new(
        "latest_config_details",
        settings.config_tracker.refresh_interval(),
        settings.config_tracker.refresh_jitter(),
        fetch,
    );
    refresher.start();

    println!("\n🔄 Running. Press Ctrl+C to stop.\n");

    let mut current = details;
    let mut watch = interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                println!("\n🛑 Shutdown signal received");
                break;
            }
            _ = watch.tick() => {
                if let Some(latest) = refresher.get() {
                    if latest.config_digest != current.config_digest {
                        info!(
                            "🔄 OCR config changed at block {}: {:?}",
                            latest.changed_in_block, latest.config_digest
                        );
                        current = *latest;
                    }
                }
            }
        }
    }

    refresher.stop().await;
    plugin.close().await.context("close plugin")?;
    println!("✅ Shutdown complete");
    Ok(())
}
