use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use tokio::sync::mpsc;

use crate::chain::btc::BitcoinClaimEngine;
use crate::chain::liquid::LiquidClaimEngine;
use crate::config::EngineConfig;
use crate::covenant::CovenantClient;
use crate::lock::SwapLock;
use crate::notify::Notifier;
use crate::provider::SWAP_PROVIDER;
use crate::provider::api::ProviderApi;
use crate::swap::routing_hint::MagicHintResolver;
use crate::swap::store::SqliteSwapStore;

/// The swap engine: request building, status dispatch and cooperative
/// claiming over one shared store and provider client.
///
/// The store mutex is only ever held across synchronous sqlite calls,
/// never across awaits.
pub struct SwapEngine {
    pub(crate) cfg: EngineConfig,
    pub(crate) api: Arc<ProviderApi>,
    store: Mutex<SqliteSwapStore>,
    pub(crate) lock: Arc<dyn SwapLock>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) covenant: Option<CovenantClient>,
    pub(crate) btc: BitcoinClaimEngine,
    pub(crate) liquid: LiquidClaimEngine,
    pub(crate) hints: MagicHintResolver,
    subscribe_tx: mpsc::UnboundedSender<String>,
}

impl SwapEngine {
    /// Builds the engine and the receiver half of the subscription
    /// channel, which the websocket manager drains to subscribe newly
    /// created swaps.
    pub fn new(
        cfg: EngineConfig,
        store: SqliteSwapStore,
        lock: Arc<dyn SwapLock>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<String>)> {
        let api = Arc::new(ProviderApi::new(cfg.provider_url.clone()));
        let covenant = cfg.covenant_claim_url.clone().map(CovenantClient::new);
        let btc = BitcoinClaimEngine::new(api.clone(), cfg.bitcoin_network);
        let liquid = LiquidClaimEngine::new(
            api.clone(),
            cfg.liquid_network.address_params(),
            cfg.liquid_genesis().context("liquid genesis hash")?,
        );
        let hints = MagicHintResolver::new(api.clone(), cfg.policy_asset().context("policy asset")?);
        let (subscribe_tx, subscribe_rx) = mpsc::unbounded_channel();

        let engine = Arc::new(Self {
            cfg,
            api,
            store: Mutex::new(store),
            lock,
            notifier,
            covenant,
            btc,
            liquid,
            hints,
            subscribe_tx,
        });
        Ok((engine, subscribe_rx))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub(crate) fn with_store<T>(
        &self,
        f: impl FnOnce(&mut SqliteSwapStore) -> Result<T>,
    ) -> Result<T> {
        let mut store = self.store.lock().expect("store mutex poisoned");
        f(&mut store)
    }

    /// Provider-side ids of all pending swaps, re-subscribed on every
    /// websocket (re)connect.
    pub fn active_swap_ids(&self) -> Result<Vec<String>> {
        self.with_store(|store| {
            Ok(store
                .get_active_swaps(SWAP_PROVIDER)?
                .iter()
                .map(|swap| swap.provider_id().to_string())
                .collect())
        })
    }

    pub fn get_swap_by_provider_id(
        &self,
        provider_swap_id: &str,
    ) -> Result<Option<crate::swap::Swap>> {
        self.with_store(|store| store.get_by_provider_id(provider_swap_id))
    }

    /// Queues a freshly created swap id for subscription. Best-effort:
    /// when the websocket is down, the reconnect path re-subscribes all
    /// pending swaps from the store anyway.
    pub(crate) fn request_subscription(&self, provider_swap_id: &str) {
        if self.subscribe_tx.send(provider_swap_id.to_string()).is_err() {
            tracing::debug!(
                swap = %provider_swap_id,
                "subscription channel closed; websocket manager not running"
            );
        }
    }
}
