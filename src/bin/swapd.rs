use std::path::PathBuf;
use std::str::FromStr as _;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use liquid_swap_engine::config::{EngineConfig, LiquidNetwork};
use liquid_swap_engine::engine::SwapEngine;
use liquid_swap_engine::lock::ProcessLock;
use liquid_swap_engine::notify::TracingNotifier;
use liquid_swap_engine::provider::ws::SubscriptionManager;
use liquid_swap_engine::swap::store::SqliteSwapStore;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, default_value = "https://api.boltz.exchange/v2")]
    provider_url: String,

    #[arg(long)]
    provider_ws_url: Option<String>,

    #[arg(long)]
    covenant_claim_url: Option<String>,

    #[arg(long)]
    store_path: PathBuf,

    /// Whether the websocket subscription loop starts at boot.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    enable_ws: bool,

    #[arg(long, default_value = "bitcoin")]
    bitcoin_network: bitcoin::Network,

    #[arg(long, default_value = "liquid")]
    liquid_network: LiquidNetwork,

    /// Required for elementsregtest, ignored otherwise.
    #[arg(long)]
    liquid_genesis_hash: Option<String>,

    /// Required for elementsregtest, ignored otherwise.
    #[arg(long)]
    liquid_policy_asset: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    liquid_swap_engine::logging::init().ok();

    let args = Args::parse();

    let liquid_genesis_hash = args
        .liquid_genesis_hash
        .as_deref()
        .map(lwk_wollet::elements::BlockHash::from_str)
        .transpose()
        .context("parse liquid_genesis_hash")?;
    let liquid_policy_asset = args
        .liquid_policy_asset
        .as_deref()
        .map(lwk_wollet::elements::AssetId::from_str)
        .transpose()
        .context("parse liquid_policy_asset")?;

    let cfg = EngineConfig {
        provider_url: args.provider_url,
        provider_ws_url: args.provider_ws_url,
        covenant_claim_url: args.covenant_claim_url,
        store_path: args.store_path,
        ws_enabled: args.enable_ws,
        bitcoin_network: args.bitcoin_network,
        liquid_network: args.liquid_network,
        liquid_genesis_hash,
        liquid_policy_asset,
    };

    let store = SqliteSwapStore::open(cfg.store_path.clone()).context("open swap store")?;
    tracing::info!(store = %store.path().display(), "swap store ready");

    let (engine, subscribe_rx) = SwapEngine::new(
        cfg.clone(),
        store,
        Arc::new(ProcessLock::new()),
        Arc::new(TracingNotifier),
    )
    .context("build swap engine")?;

    if !cfg.ws_enabled {
        tracing::info!("websocket subscription disabled by config, exiting");
        return Ok(());
    }

    let ws_url = cfg.ws_url();
    tracing::info!(%ws_url, "starting provider subscription loop");
    SubscriptionManager::new(engine, ws_url, subscribe_rx)
        .run()
        .await;

    Ok(())
}
