//! Swap request building: limits validation, secret generation,
//! provider calls and atomic persistence, in that order. A failed
//! provider call leaves nothing behind.

use anyhow::{Context as _, Result};
use bitcoin::hashes::{Hash as _, sha256};
use rand::RngCore as _;
use zeroize::Zeroize as _;

use crate::covenant::CovenantRegistration;
use crate::engine::SwapEngine;
use crate::error::SwapError;
use crate::lightning::invoice::{amount_sat_from_bolt11, payment_hash_from_bolt11};
use crate::provider::api::{CreateChainRequest, CreateReverseRequest, CreateSubmarineRequest};
use crate::provider::{ChainSymbol, SWAP_PROVIDER};
use crate::swap::limits::{pair_limits, validate_amount};
use crate::swap::routing_hint::DirectSettlement;
use crate::swap::{ChainRequest, ReverseRequest, SubmarineRequest, Swap, SwapRequest, SwapResponse};

/// Outcome of routing a Lightning payment: either the invoice carried a
/// verified magic routing hint and settles directly on-chain, or a
/// submarine swap was created.
#[derive(Debug)]
pub enum LightningPayment {
    Direct(DirectSettlement),
    Swap(Swap),
}

fn fresh_keypair() -> (secp256k1::SecretKey, String) {
    let secp = secp256k1::Secp256k1::new();
    let secret = secp256k1::SecretKey::new(&mut rand::rng());
    let public_hex = hex::encode(secret.public_key(&secp).serialize());
    (secret, public_hex)
}

fn fresh_preimage() -> ([u8; 32], [u8; 32]) {
    let mut preimage = [0u8; 32];
    rand::rng().fill_bytes(&mut preimage);
    let hash = sha256::Hash::hash(&preimage).to_byte_array();
    (preimage, hash)
}

impl SwapEngine {
    /// Routes a Lightning payment: resolves a magic routing hint first
    /// and falls back to a submarine swap when there is none or any of
    /// its checks fail.
    pub async fn pay_invoice(
        &self,
        wallet_account_id: &str,
        invoice: &str,
    ) -> Result<LightningPayment, SwapError> {
        match self.hints.resolve(invoice).await {
            Ok(Some(direct)) => return Ok(LightningPayment::Direct(direct)),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "magic routing hint rejected; falling back to submarine swap"
                );
            }
        }

        let swap = self.create_submarine_swap(wallet_account_id, invoice).await?;
        Ok(LightningPayment::Swap(swap))
    }

    /// Creates a submarine swap paying `invoice` from the Liquid wallet.
    /// Creating a second swap for an invoice we already hold a pending
    /// swap for would risk paying it twice; the existing swap is
    /// returned instead.
    pub async fn create_submarine_swap(
        &self,
        wallet_account_id: &str,
        invoice: &str,
    ) -> Result<Swap, SwapError> {
        if let Some(existing) = self.with_store(|store| store.get_by_invoice(invoice))?
            && !existing.completed
        {
            tracing::info!(swap_id = %existing.id, "reusing pending swap for invoice");
            return Ok(existing);
        }

        let amount_sat = amount_sat_from_bolt11(invoice)
            .map_err(|e| SwapError::InvalidInvoice(format!("{e:#}")))?
            .ok_or_else(|| SwapError::InvalidInvoice("invoice without amount".to_string()))?;

        let pairs = self.api.get_submarine_pairs().await?;
        let limits = pair_limits(&pairs, ChainSymbol::Lbtc, ChainSymbol::Btc)?;
        validate_amount(limits, amount_sat)?;

        let (refund_key, refund_public_key) = fresh_keypair();

        let created = self
            .api
            .create_submarine_swap(&CreateSubmarineRequest {
                from: ChainSymbol::Lbtc,
                to: ChainSymbol::Btc,
                invoice: invoice.to_string(),
                refund_public_key,
            })
            .await?;

        let request = SwapRequest::Submarine(SubmarineRequest {
            provider: SWAP_PROVIDER,
            from: ChainSymbol::Lbtc,
            to: ChainSymbol::Btc,
            invoice: invoice.to_string(),
            refund_key: hex::encode(refund_key.secret_bytes()),
        });
        let response = SwapResponse::Submarine(created);

        let swap =
            self.with_store(|store| store.create_swap(wallet_account_id, request, response))?;
        tracing::info!(swap_id = %swap.id, provider_id = %swap.provider_id(), "created submarine swap");

        self.request_subscription(swap.provider_id());
        Ok(swap)
    }

    /// Creates a reverse swap receiving `amount_sat` on Liquid at
    /// `claim_address`. With `covenant` set, the claim is delegated to
    /// the external covenant service and the signing engine never
    /// touches this swap.
    pub async fn create_reverse_swap(
        &self,
        wallet_account_id: &str,
        amount_sat: u64,
        claim_address: &str,
        covenant: bool,
    ) -> Result<Swap, SwapError> {
        let pairs = self.api.get_reverse_pairs().await?;
        let limits = pair_limits(&pairs, ChainSymbol::Btc, ChainSymbol::Lbtc)?;
        validate_amount(limits, amount_sat)?;

        let (claim_key, claim_public_key) = fresh_keypair();
        let (mut preimage, preimage_hash) = fresh_preimage();

        let created = self
            .api
            .create_reverse_swap(&CreateReverseRequest {
                from: ChainSymbol::Btc,
                to: ChainSymbol::Lbtc,
                invoice_amount: amount_sat,
                preimage_hash: hex::encode(preimage_hash),
                claim_public_key: claim_public_key.clone(),
            })
            .await?;

        // The invoice the provider wants paid must commit to our
        // preimage; anything else could be settled without unlocking
        // our lockup.
        let invoice_hash = payment_hash_from_bolt11(&created.invoice)
            .map_err(|e| SwapError::InvalidInvoice(format!("{e:#}")))?;
        if invoice_hash != preimage_hash {
            preimage.zeroize();
            return Err(SwapError::Other(anyhow::anyhow!(
                "provider invoice does not commit to our preimage hash"
            )));
        }

        if covenant {
            let client = self
                .covenant
                .as_ref()
                .context("covenant option requires a configured covenant-claim service")?;
            client
                .register(&CovenantRegistration {
                    address: claim_address.to_string(),
                    preimage: hex::encode(preimage),
                    swap_tree: created.swap_tree.clone(),
                    claim_public_key,
                    blinding_key: created.blinding_key.clone(),
                })
                .await
                .context("register covenant claim")?;
        }

        let request = SwapRequest::Reverse(ReverseRequest {
            provider: SWAP_PROVIDER,
            from: ChainSymbol::Btc,
            to: ChainSymbol::Lbtc,
            invoice_amount: amount_sat,
            claim_key: hex::encode(claim_key.secret_bytes()),
            preimage: hex::encode(preimage),
            claim_address: claim_address.to_string(),
            covenant,
        });
        preimage.zeroize();
        let response = SwapResponse::Reverse(created);

        let swap =
            self.with_store(|store| store.create_swap(wallet_account_id, request, response))?;
        tracing::info!(
            swap_id = %swap.id,
            provider_id = %swap.provider_id(),
            covenant,
            "created reverse swap"
        );

        self.request_subscription(swap.provider_id());
        Ok(swap)
    }

    /// Creates a chain swap moving `amount_sat` from `from` to `to`,
    /// claiming at `claim_address` on the `to` chain.
    pub async fn create_chain_swap(
        &self,
        wallet_account_id: &str,
        from: ChainSymbol,
        to: ChainSymbol,
        amount_sat: u64,
        claim_address: &str,
    ) -> Result<Swap, SwapError> {
        if from == to {
            return Err(SwapError::Other(anyhow::anyhow!(
                "chain swap requires two different chains"
            )));
        }

        let pairs = self.api.get_chain_pairs().await?;
        let limits = pair_limits(&pairs, from, to)?;
        validate_amount(limits, amount_sat)?;

        let (claim_key, claim_public_key) = fresh_keypair();
        let (mut preimage, preimage_hash) = fresh_preimage();
        let (refund_key, refund_public_key) = fresh_keypair();

        let created = self
            .api
            .create_chain_swap(&CreateChainRequest {
                from,
                to,
                user_lock_amount: amount_sat,
                preimage_hash: hex::encode(preimage_hash),
                claim_public_key,
                refund_public_key,
            })
            .await?;

        let request = SwapRequest::Chain(ChainRequest {
            provider: SWAP_PROVIDER,
            from,
            to,
            amount: amount_sat,
            claim_key: hex::encode(claim_key.secret_bytes()),
            refund_key: hex::encode(refund_key.secret_bytes()),
            preimage: hex::encode(preimage),
            claim_address: claim_address.to_string(),
        });
        preimage.zeroize();
        let response = SwapResponse::Chain(created);

        let swap =
            self.with_store(|store| store.create_swap(wallet_account_id, request, response))?;
        tracing::info!(
            swap_id = %swap.id,
            provider_id = %swap.provider_id(),
            %from,
            %to,
            "created chain swap"
        );

        self.request_subscription(swap.provider_id());
        Ok(swap)
    }
}
