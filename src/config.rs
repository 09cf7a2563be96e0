use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context as _, Result};
use lwk_wollet::elements::{AddressParams, AssetId, BlockHash};

/// Liquid network the engine claims on. Carries the address params,
/// policy asset and genesis hash the Liquid signing engine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidNetwork {
    Liquid,
    LiquidTestnet,
    ElementsRegtest,
}

const LIQUID_GENESIS: &str = "1466275836220db2944ca059a3a10ef6fd2ea684b0688d2c379296888a206003";
const LIQUID_TESTNET_GENESIS: &str =
    "a771da8e52ee6ad581ed1e9a99825e5b3b7992225534eaa2ae23244fe26ab1c1";

const LIQUID_POLICY_ASSET: &str =
    "6f0279e9ed041c3d710a9f57d0c02928416460c4b722ae3457a11eec381c526d";
const LIQUID_TESTNET_POLICY_ASSET: &str =
    "144c654344aa716d6f3abcc1ca90e5641e4e2a7f633bc09fe3baf64585819a49";

impl LiquidNetwork {
    pub fn address_params(&self) -> &'static AddressParams {
        match self {
            LiquidNetwork::Liquid => &AddressParams::LIQUID,
            LiquidNetwork::LiquidTestnet => &AddressParams::LIQUID_TESTNET,
            LiquidNetwork::ElementsRegtest => &AddressParams::ELEMENTS,
        }
    }

    /// Genesis block hash, bound into every Liquid taproot sighash.
    /// Regtest chains have no fixed genesis; it must come from config.
    pub fn genesis_hash(&self) -> Result<BlockHash> {
        let hex = match self {
            LiquidNetwork::Liquid => LIQUID_GENESIS,
            LiquidNetwork::LiquidTestnet => LIQUID_TESTNET_GENESIS,
            LiquidNetwork::ElementsRegtest => {
                anyhow::bail!("regtest requires an explicit liquid genesis hash")
            }
        };
        BlockHash::from_str(hex).context("parse liquid genesis hash")
    }

    pub fn policy_asset(&self) -> Result<AssetId> {
        let hex = match self {
            LiquidNetwork::Liquid => LIQUID_POLICY_ASSET,
            LiquidNetwork::LiquidTestnet => LIQUID_TESTNET_POLICY_ASSET,
            LiquidNetwork::ElementsRegtest => {
                anyhow::bail!("regtest requires an explicit policy asset")
            }
        };
        AssetId::from_str(hex).context("parse policy asset id")
    }
}

impl FromStr for LiquidNetwork {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "liquid" => Ok(LiquidNetwork::Liquid),
            "liquidtestnet" => Ok(LiquidNetwork::LiquidTestnet),
            "elementsregtest" => Ok(LiquidNetwork::ElementsRegtest),
            other => anyhow::bail!("unknown liquid network: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Provider REST base URL, e.g. `https://api.boltz.exchange/v2`.
    pub provider_url: String,
    /// Websocket endpoint; derived from `provider_url` when not set.
    pub provider_ws_url: Option<String>,
    /// External covenant-claim service; reverse swaps created with the
    /// covenant option are registered here and never touch the signing
    /// engine.
    pub covenant_claim_url: Option<String>,
    pub store_path: PathBuf,
    /// Whether the websocket subscription loop starts at boot.
    pub ws_enabled: bool,
    pub bitcoin_network: bitcoin::Network,
    pub liquid_network: LiquidNetwork,
    /// Overrides for regtest chains.
    pub liquid_genesis_hash: Option<BlockHash>,
    pub liquid_policy_asset: Option<AssetId>,
}

impl EngineConfig {
    pub fn ws_url(&self) -> String {
        match &self.provider_ws_url {
            Some(url) => url.clone(),
            None => {
                let base = self
                    .provider_url
                    .replacen("https://", "wss://", 1)
                    .replacen("http://", "ws://", 1);
                format!("{}/ws", base.trim_end_matches('/'))
            }
        }
    }

    pub fn liquid_genesis(&self) -> Result<BlockHash> {
        match self.liquid_genesis_hash {
            Some(hash) => Ok(hash),
            None => self.liquid_network.genesis_hash(),
        }
    }

    pub fn policy_asset(&self) -> Result<AssetId> {
        match self.liquid_policy_asset {
            Some(asset) => Ok(asset),
            None => self.liquid_network.policy_asset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_derived_from_rest_url() {
        let cfg = EngineConfig {
            provider_url: "https://api.example.org/v2".to_string(),
            provider_ws_url: None,
            covenant_claim_url: None,
            store_path: PathBuf::from("/tmp/swaps.sqlite3"),
            ws_enabled: true,
            bitcoin_network: bitcoin::Network::Bitcoin,
            liquid_network: LiquidNetwork::Liquid,
            liquid_genesis_hash: None,
            liquid_policy_asset: None,
        };
        assert_eq!(cfg.ws_url(), "wss://api.example.org/v2/ws");
    }

    #[test]
    fn regtest_requires_overrides() {
        assert!(LiquidNetwork::ElementsRegtest.genesis_hash().is_err());
        assert!(LiquidNetwork::ElementsRegtest.policy_asset().is_err());
        assert!(LiquidNetwork::Liquid.genesis_hash().is_ok());
        assert!(LiquidNetwork::LiquidTestnet.policy_asset().is_ok());
    }
}
