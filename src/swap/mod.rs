pub mod builder;
pub mod dispatcher;
pub mod limits;
pub mod routing_hint;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::provider::api::{ChainSwapCreated, ReverseSwapCreated, SubmarineSwapCreated};
use crate::provider::{ChainSymbol, SwapProvider, SwapType};

/// Locally-built side of a swap: the public parameters we sent to the
/// provider plus the secret material we generated for it. Secrets live
/// only here and inside the signing engine; they are never logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SwapRequest {
    Submarine(SubmarineRequest),
    Reverse(ReverseRequest),
    Chain(ChainRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmarineRequest {
    pub provider: SwapProvider,
    pub from: ChainSymbol,
    pub to: ChainSymbol,
    pub invoice: String,
    /// Ephemeral refund secret key, hex encoded.
    pub refund_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseRequest {
    pub provider: SwapProvider,
    pub from: ChainSymbol,
    pub to: ChainSymbol,
    pub invoice_amount: u64,
    /// Ephemeral claim secret key, hex encoded.
    pub claim_key: String,
    /// 32-byte payment preimage, hex encoded.
    pub preimage: String,
    /// Where the claimed funds go.
    pub claim_address: String,
    /// Claimed by the external covenant service instead of the signing
    /// engine.
    pub covenant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainRequest {
    pub provider: SwapProvider,
    pub from: ChainSymbol,
    pub to: ChainSymbol,
    pub amount: u64,
    pub claim_key: String,
    pub refund_key: String,
    pub preimage: String,
    pub claim_address: String,
}

/// The provider's public commitment, mirroring the request's kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SwapResponse {
    Submarine(SubmarineSwapCreated),
    Reverse(ReverseSwapCreated),
    Chain(ChainSwapCreated),
}

impl SwapRequest {
    pub fn swap_type(&self) -> SwapType {
        match self {
            SwapRequest::Submarine(_) => SwapType::Submarine,
            SwapRequest::Reverse(_) => SwapType::Reverse,
            SwapRequest::Chain(_) => SwapType::Chain,
        }
    }

    pub fn provider(&self) -> SwapProvider {
        match self {
            SwapRequest::Submarine(r) => r.provider,
            SwapRequest::Reverse(r) => r.provider,
            SwapRequest::Chain(r) => r.provider,
        }
    }
}

impl SwapResponse {
    pub fn swap_type(&self) -> SwapType {
        match self {
            SwapResponse::Submarine(_) => SwapType::Submarine,
            SwapResponse::Reverse(_) => SwapType::Reverse,
            SwapResponse::Chain(_) => SwapType::Chain,
        }
    }

    /// The provider-side swap id, used as the websocket subscription key.
    pub fn provider_id(&self) -> &str {
        match self {
            SwapResponse::Submarine(r) => &r.id,
            SwapResponse::Reverse(r) => &r.id,
            SwapResponse::Chain(r) => &r.id,
        }
    }

    /// Invoice attached to the swap, when the kind carries one.
    pub fn invoice(&self) -> Option<&str> {
        match self {
            SwapResponse::Submarine(_) => None,
            SwapResponse::Reverse(r) => Some(&r.invoice),
            SwapResponse::Chain(_) => None,
        }
    }
}

/// A persisted swap. Created once at request time, mutated exactly once
/// (`completed: false -> true`) by the dispatcher, never deleted.
#[derive(Debug, Clone)]
pub struct Swap {
    pub id: String,
    pub wallet_account_id: String,
    pub request: SwapRequest,
    pub response: SwapResponse,
    pub completed: bool,
    pub created_at: i64,
}

impl Swap {
    pub fn swap_type(&self) -> SwapType {
        self.request.swap_type()
    }

    pub fn provider_id(&self) -> &str {
        self.response.provider_id()
    }

    /// The invoice the swap settles: the one we asked the provider to pay
    /// for submarine swaps, the one the provider issued for reverse swaps.
    pub fn invoice(&self) -> Option<&str> {
        match (&self.request, &self.response) {
            (SwapRequest::Submarine(req), _) => Some(&req.invoice),
            (_, response) => response.invoice(),
        }
    }
}
