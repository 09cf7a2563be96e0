//! Magic routing hint resolution.
//!
//! A provider-issued invoice can carry a routing hint with a fixed,
//! reserved short channel id. The hint signals that the recipient
//! accepts direct on-chain settlement: instead of a submarine swap, the
//! payer fetches a BIP-21 payload, verifies it against the hint's key,
//! and pays the address directly. Verification is independent of the
//! provider's honesty — the signature binds the destination address to
//! the key embedded in the invoice.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use bitcoin::hashes::{Hash as _, sha256};
use lightning_invoice::Bolt11Invoice;
use lwk_wollet::elements::AssetId;

use crate::error::SwapError;
use crate::lightning::invoice::{decode_bolt11, route_hint_hops};
use crate::provider::api::ProviderApi;

/// Reserved short channel id marking a magic routing hint.
pub const MAGIC_ROUTING_HINT_SCID: u64 = 0x0846_c900_051c_0000;

/// Direct on-chain settlement extracted from a verified hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectSettlement {
    pub address: String,
    pub amount_sat: u64,
    pub asset: AssetId,
}

/// The hint's node key, when the invoice carries the magic short
/// channel id.
pub fn find_magic_hint(invoice: &Bolt11Invoice) -> Option<bitcoin::secp256k1::PublicKey> {
    route_hint_hops(invoice)
        .into_iter()
        .find(|hop| hop.short_channel_id == MAGIC_ROUTING_HINT_SCID)
        .map(|hop| hop.src_node_id)
}

pub struct MagicHintResolver {
    api: Arc<ProviderApi>,
    expected_asset: AssetId,
}

impl MagicHintResolver {
    pub fn new(api: Arc<ProviderApi>, expected_asset: AssetId) -> Self {
        Self {
            api,
            expected_asset,
        }
    }

    /// Resolves an invoice to a direct settlement, or `None` when it
    /// carries no magic hint. Verification failures are typed errors;
    /// the caller falls back to a submarine swap on either outcome.
    pub async fn resolve(&self, invoice: &str) -> Result<Option<DirectSettlement>, SwapError> {
        let decoded =
            decode_bolt11(invoice).map_err(|e| SwapError::InvalidInvoice(format!("{e:#}")))?;
        let Some(hint_key) = find_magic_hint(&decoded) else {
            return Ok(None);
        };

        let invoice_sat = decoded
            .amount_milli_satoshis()
            .map(|msat| msat / 1000)
            .ok_or_else(|| SwapError::InvalidInvoice("invoice without amount".to_string()))?;

        let payload = self.api.get_reverse_bip21(invoice).await?;
        let parsed = parse_bip21(&payload.bip21)?;

        verify_hint_signature(&parsed.address, &payload.signature, &hint_key)?;

        let asset = parsed
            .asset_id
            .as_deref()
            .and_then(|id| id.parse::<AssetId>().ok())
            .ok_or(SwapError::InvalidAsset)?;
        if asset != self.expected_asset {
            return Err(SwapError::InvalidAsset);
        }

        let amount_btc = parsed.amount.context("bip21 payload without amount")?;
        let hint_sat = btc_str_to_sat(&amount_btc)?;
        check_hint_amount(hint_sat, invoice_sat)?;

        Ok(Some(DirectSettlement {
            address: parsed.address,
            amount_sat: hint_sat,
            asset,
        }))
    }
}

/// BIP-340 verification of `SHA256(address)` against the hint key.
pub fn verify_hint_signature(
    address: &str,
    signature_hex: &str,
    hint_key: &bitcoin::secp256k1::PublicKey,
) -> Result<(), SwapError> {
    let secp = secp256k1::Secp256k1::new();

    let sig_bytes = hex::decode(signature_hex).context("decode hint signature hex")?;
    let signature =
        secp256k1::schnorr::Signature::from_slice(&sig_bytes).context("parse hint signature")?;

    // The hint key crosses secp256k1 crate versions by serialization.
    let key = secp256k1::PublicKey::from_slice(&hint_key.serialize())
        .context("convert hint public key")?;
    let (xonly, _parity) = key.x_only_public_key();

    let digest = sha256::Hash::hash(address.as_bytes()).to_byte_array();
    secp.verify_schnorr(&signature, &digest, &xonly)
        .map_err(|_| SwapError::InvalidSignature)
}

/// The recipient must never be authorized for less than the invoice
/// declares; equality passes, any excess fails.
pub fn check_hint_amount(hint_sat: u64, invoice_sat: u64) -> Result<(), SwapError> {
    if hint_sat > invoice_sat {
        return Err(SwapError::InvalidAmount {
            hint_sat,
            invoice_sat,
        });
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
struct ParsedBip21 {
    address: String,
    amount: Option<String>,
    asset_id: Option<String>,
}

fn parse_bip21(uri: &str) -> Result<ParsedBip21> {
    let (_scheme, rest) = uri.split_once(':').context("bip21 without scheme")?;
    let (address, query) = rest.split_once('?').unwrap_or((rest, ""));
    anyhow::ensure!(!address.is_empty(), "bip21 without address");

    let mut amount = None;
    let mut asset_id = None;
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "amount" => amount = Some(value.to_string()),
            "assetid" => asset_id = Some(value.to_string()),
            _ => {}
        }
    }

    Ok(ParsedBip21 {
        address: address.to_string(),
        amount,
        asset_id,
    })
}

/// Exact decimal-BTC to satoshi conversion; rejects sub-satoshi
/// precision instead of rounding.
fn btc_str_to_sat(amount: &str) -> Result<u64> {
    let (int_part, frac_part) = amount.split_once('.').unwrap_or((amount, ""));
    anyhow::ensure!(
        frac_part.len() <= 8,
        "bip21 amount has sub-satoshi precision: {amount}"
    );

    let int_sat: u64 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse::<u64>()
            .with_context(|| format!("invalid bip21 amount: {amount}"))?
            .checked_mul(100_000_000)
            .context("bip21 amount overflow")?
    };

    let frac_sat: u64 = if frac_part.is_empty() {
        0
    } else {
        format!("{frac_part:0<8}")
            .parse()
            .with_context(|| format!("invalid bip21 amount: {amount}"))?
    };

    int_sat.checked_add(frac_sat).context("bip21 amount overflow")
}
