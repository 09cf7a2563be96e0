use std::collections::HashMap;

use anyhow::{Context as _, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::ChainSymbol;

/// Thin client for the provider's v2 REST API.
///
/// Every call returns an `anyhow` error with the endpoint in context;
/// 4xx responses carry the provider's `error` message.
#[derive(Debug, Clone)]
pub struct ProviderApi {
    base_url: String,
    http: reqwest::Client,
}

/// `{minimal, maximal}` satoshi bounds the provider publishes per pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PairLimits {
    pub minimal: u64,
    pub maximal: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairInfo {
    pub limits: PairLimits,
    #[serde(default)]
    pub fees: serde_json::Value,
}

/// Nested `from -> to -> info` map, as returned by the pair endpoints.
pub type PairMap = HashMap<String, HashMap<String, PairInfo>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTreeLeaf {
    pub version: u8,
    /// Leaf script, hex encoded.
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTree {
    pub claim_leaf: SwapTreeLeaf,
    pub refund_leaf: SwapTreeLeaf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubmarineRequest {
    pub from: ChainSymbol,
    pub to: ChainSymbol,
    pub invoice: String,
    /// Our ephemeral refund public key, hex encoded.
    pub refund_public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmarineSwapCreated {
    pub id: String,
    pub address: String,
    pub swap_tree: SwapTree,
    /// The provider's claim public key, hex encoded.
    pub claim_public_key: String,
    pub timeout_block_height: u32,
    pub expected_amount: u64,
    #[serde(default)]
    pub accept_zero_conf: bool,
    /// Lockup blinding key for Liquid lockups, hex encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blinding_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReverseRequest {
    pub from: ChainSymbol,
    pub to: ChainSymbol,
    pub invoice_amount: u64,
    /// SHA256 of our preimage, hex encoded.
    pub preimage_hash: String,
    /// Our ephemeral claim public key, hex encoded.
    pub claim_public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseSwapCreated {
    pub id: String,
    pub invoice: String,
    pub swap_tree: SwapTree,
    pub lockup_address: String,
    /// The provider's refund public key, hex encoded.
    pub refund_public_key: String,
    pub timeout_block_height: u32,
    pub onchain_amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blinding_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChainRequest {
    pub from: ChainSymbol,
    pub to: ChainSymbol,
    pub user_lock_amount: u64,
    pub preimage_hash: String,
    pub claim_public_key: String,
    pub refund_public_key: String,
}

/// One leg of a chain swap. `claim_details` is the leg we claim,
/// `lockup_details` the leg we locked up on; the two must never be
/// swapped when picking key roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSwapData {
    pub swap_tree: SwapTree,
    pub lockup_address: String,
    pub server_public_key: String,
    pub timeout_block_height: u32,
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blinding_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSwapCreated {
    pub id: String,
    pub claim_details: ChainSwapData,
    pub lockup_details: ChainSwapData,
}

/// Claim info the provider hands out for a submarine swap it has paid:
/// its preimage, its public nonce and the sighash of its sweep.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmarineClaimInfo {
    pub preimage: String,
    pub pub_nonce: String,
    pub public_key: String,
    pub transaction_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSignatureData {
    pub pub_nonce: String,
    pub partial_signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseClaimRequest {
    pub index: u32,
    /// Our claim transaction, hex encoded.
    pub transaction: String,
    pub preimage: String,
    pub pub_nonce: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainClaimInfo {
    pub pub_nonce: String,
    pub public_key: String,
    pub transaction_hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainClaimRequest {
    pub preimage: String,
    /// Our partial signature for the provider's sweep of the refund leg.
    pub signature: PartialSignatureData,
    pub to_sign: ChainClaimToSign,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainClaimToSign {
    pub index: u32,
    pub transaction: String,
    pub pub_nonce: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bip21Payload {
    pub bip21: String,
    /// BIP-340 signature over SHA256(address), hex encoded.
    pub signature: String,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    hex: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl ProviderApi {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        Self::decode(path, resp).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        Self::decode(path, resp).await
    }

    async fn decode<T: DeserializeOwned>(path: &str, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<ErrorBody>()
                .await
                .map(|b| b.error)
                .unwrap_or_else(|_| status.to_string());
            anyhow::bail!("provider rejected {path}: {message}");
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("decode response of {path}"))
    }

    pub async fn get_submarine_pairs(&self) -> Result<PairMap> {
        self.get("swap/submarine").await
    }

    pub async fn get_reverse_pairs(&self) -> Result<PairMap> {
        self.get("swap/reverse").await
    }

    pub async fn get_chain_pairs(&self) -> Result<PairMap> {
        self.get("swap/chain").await
    }

    pub async fn create_submarine_swap(
        &self,
        req: &CreateSubmarineRequest,
    ) -> Result<SubmarineSwapCreated> {
        self.post("swap/submarine", req).await
    }

    pub async fn create_reverse_swap(
        &self,
        req: &CreateReverseRequest,
    ) -> Result<ReverseSwapCreated> {
        self.post("swap/reverse", req).await
    }

    pub async fn create_chain_swap(&self, req: &CreateChainRequest) -> Result<ChainSwapCreated> {
        self.post("swap/chain", req).await
    }

    pub async fn get_submarine_claim(&self, id: &str) -> Result<SubmarineClaimInfo> {
        self.get(&format!("swap/submarine/{id}/claim")).await
    }

    pub async fn post_submarine_claim(
        &self,
        id: &str,
        signature: &PartialSignatureData,
    ) -> Result<()> {
        let _: serde_json::Value = self
            .post(&format!("swap/submarine/{id}/claim"), signature)
            .await?;
        Ok(())
    }

    pub async fn post_reverse_claim(
        &self,
        id: &str,
        req: &ReverseClaimRequest,
    ) -> Result<PartialSignatureData> {
        self.post(&format!("swap/reverse/{id}/claim"), req).await
    }

    pub async fn get_chain_claim(&self, id: &str) -> Result<ChainClaimInfo> {
        self.get(&format!("swap/chain/{id}/claim")).await
    }

    pub async fn post_chain_claim(
        &self,
        id: &str,
        req: &ChainClaimRequest,
    ) -> Result<PartialSignatureData> {
        self.post(&format!("swap/chain/{id}/claim"), req).await
    }

    /// Lockup transaction for a reverse swap, used when a status event
    /// arrives without the transaction attached.
    pub async fn get_reverse_lockup_tx(&self, id: &str) -> Result<String> {
        let resp: TransactionResponse = self
            .get(&format!("swap/reverse/{id}/transaction"))
            .await?;
        Ok(resp.hex)
    }

    /// BIP-21 payload backing a magic routing hint.
    pub async fn get_reverse_bip21(&self, invoice: &str) -> Result<Bip21Payload> {
        self.get(&format!("swap/reverse/{invoice}/bip21")).await
    }

    /// Recommended feerates in sat/vb per chain symbol.
    pub async fn get_fee_estimates(&self) -> Result<HashMap<String, f64>> {
        self.get("chain/fees").await
    }

    pub async fn broadcast(&self, chain: ChainSymbol, tx_hex: &str) -> Result<String> {
        let body = serde_json::json!({ "hex": tx_hex });
        let resp: BroadcastResponse = self
            .post(&format!("chain/{chain}/transaction"), &body)
            .await?;
        Ok(resp.id)
    }
}
