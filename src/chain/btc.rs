//! Cooperative claim construction for Bitcoin L1 lockups.

use std::str::FromStr as _;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness, absolute};

use crate::chain::tree;
use crate::error::SwapError;
use crate::lightning::invoice::payment_hash_from_bolt11;
use crate::musig::{self, CooperativeSession};
use crate::provider::ChainSymbol;
use crate::provider::api::{
    ChainClaimRequest, ChainClaimToSign, PartialSignatureData, ProviderApi, ReverseClaimRequest,
};
use crate::swap::{ChainRequest, ReverseRequest, SubmarineRequest, Swap};

const DUST_LIMIT_SAT: u64 = 546;

pub struct BitcoinClaimEngine {
    api: Arc<ProviderApi>,
    network: bitcoin::Network,
}

impl BitcoinClaimEngine {
    pub fn new(api: Arc<ProviderApi>, network: bitcoin::Network) -> Self {
        Self { api, network }
    }

    /// Cooperative submarine claim: the provider paid our invoice and
    /// asks for our partial signature so it can sweep the lockup. The
    /// preimage it presents must hash to the invoice's payment hash —
    /// that check is what proves the invoice was actually settled, so it
    /// runs before any signing state is built.
    ///
    /// Submarine lockups on Liquid are handled here too; only the swap
    /// tree commitment is chain-specific, the sighash is the provider's.
    pub async fn claim_submarine(
        &self,
        swap: &Swap,
        req: &SubmarineRequest,
        resp: &crate::provider::api::SubmarineSwapCreated,
    ) -> Result<(), SwapError> {
        let info = self.api.get_submarine_claim(swap.provider_id()).await?;
        verify_claim_preimage(&info.preimage, &req.invoice)?;

        let provider_key = musig::public_key_from_hex(&resp.claim_public_key)?;
        let local_key = musig::secret_key_from_hex(&req.refund_key)?;
        let secp = secp256k1::Secp256k1::new();
        let local_pub = local_key.public_key(&secp);

        let internal = CooperativeSession::aggregate_key(&provider_key, &local_pub);
        let tweak = tree_tweak(req.from, &resp.swap_tree, &internal)?;
        let session = CooperativeSession::new(&provider_key, &local_key, tweak)?;

        let msg32 = digest_from_hex(&info.transaction_hash)?;
        let provider_nonce = musig::parse_pub_nonce(&info.pub_nonce)?;
        let (pub_nonce, partial_signature) = session.partial_sign(msg32, &provider_nonce)?;

        self.api
            .post_submarine_claim(
                swap.provider_id(),
                &PartialSignatureData {
                    pub_nonce,
                    partial_signature,
                },
            )
            .await?;
        Ok(())
    }

    /// Claims a reverse-swap lockup to our destination address and
    /// broadcasts the result. Returns the claim txid.
    pub async fn claim_reverse(
        &self,
        swap: &Swap,
        req: &ReverseRequest,
        resp: &crate::provider::api::ReverseSwapCreated,
        lockup_hex: &str,
    ) -> Result<String, SwapError> {
        let provider_key = musig::public_key_from_hex(&resp.refund_public_key)?;
        let local_key = musig::secret_key_from_hex(&req.claim_key)?;
        let secp = secp256k1::Secp256k1::new();
        let local_pub = local_key.public_key(&secp);

        let internal = CooperativeSession::aggregate_key(&provider_key, &local_pub);
        let tweak = tree::bitcoin_tweak(&resp.swap_tree, &internal)?;
        let session = CooperativeSession::new(&provider_key, &local_key, tweak)?;

        let lockup: Transaction = deserialize_tx(lockup_hex)?;
        let (vout, lockup_out) = find_swap_output(&lockup, &session)?;
        let outpoint = OutPoint {
            txid: lockup.compute_txid(),
            vout,
        };

        let destination = bitcoin::Address::from_str(&req.claim_address)
            .context("parse claim address")?
            .require_network(self.network)
            .context("claim address network mismatch")?;

        let feerate = self.feerate().await?;
        let mut tx = build_claim_tx(
            outpoint,
            lockup_out.value.to_sat(),
            destination.script_pubkey(),
            feerate,
        )?;

        let msg32 = keyspend_sighash(&tx, lockup_out)?;
        let pending = session.begin(msg32);

        let their = self
            .api
            .post_reverse_claim(
                swap.provider_id(),
                &ReverseClaimRequest {
                    index: 0,
                    transaction: bitcoin::consensus::encode::serialize_hex(&tx),
                    preimage: req.preimage.clone(),
                    pub_nonce: pending.pub_nonce_hex(),
                },
            )
            .await?;

        let provider_nonce = musig::parse_pub_nonce(&their.pub_nonce)?;
        let provider_partial = musig::parse_partial_signature(&their.partial_signature)?;
        let signature = session.complete(pending, &provider_nonce, provider_partial)?;

        tx.input[0].witness = Witness::from_slice(&[signature.as_slice()]);

        let txid = self
            .api
            .broadcast(
                ChainSymbol::Btc,
                &bitcoin::consensus::encode::serialize_hex(&tx),
            )
            .await?;
        Ok(txid)
    }

    /// Claims the Bitcoin leg of a chain swap. The two legs use distinct
    /// key roles: the leg we claim pairs our claim key with
    /// `claimDetails.serverPublicKey`; the cooperative signature we hand
    /// back for the provider's sweep pairs our refund key with
    /// `lockupDetails.serverPublicKey`.
    pub async fn claim_chain(
        &self,
        swap: &Swap,
        req: &ChainRequest,
        resp: &crate::provider::api::ChainSwapCreated,
        lockup_hex: &str,
    ) -> Result<String, SwapError> {
        let secp = secp256k1::Secp256k1::new();

        let claim_server_key = musig::public_key_from_hex(&resp.claim_details.server_public_key)?;
        let claim_key = musig::secret_key_from_hex(&req.claim_key)?;
        let claim_pub = claim_key.public_key(&secp);
        let claim_internal = CooperativeSession::aggregate_key(&claim_server_key, &claim_pub);
        let claim_tweak = tree::bitcoin_tweak(&resp.claim_details.swap_tree, &claim_internal)?;
        let claim_session = CooperativeSession::new(&claim_server_key, &claim_key, claim_tweak)?;

        let lockup: Transaction = deserialize_tx(lockup_hex)?;
        let (vout, lockup_out) = find_swap_output(&lockup, &claim_session)?;
        let outpoint = OutPoint {
            txid: lockup.compute_txid(),
            vout,
        };

        let destination = bitcoin::Address::from_str(&req.claim_address)
            .context("parse claim address")?
            .require_network(self.network)
            .context("claim address network mismatch")?;

        let feerate = self.feerate().await?;
        let mut tx = build_claim_tx(
            outpoint,
            lockup_out.value.to_sat(),
            destination.script_pubkey(),
            feerate,
        )?;
        let msg32 = keyspend_sighash(&tx, lockup_out)?;
        let pending = claim_session.begin(msg32);

        // Refund leg: partially sign the provider's sweep of our lockup.
        let info = self.api.get_chain_claim(swap.provider_id()).await?;
        let refund_server_key =
            musig::public_key_from_hex(&resp.lockup_details.server_public_key)?;
        let refund_key = musig::secret_key_from_hex(&req.refund_key)?;
        let refund_pub = refund_key.public_key(&secp);
        let refund_internal = CooperativeSession::aggregate_key(&refund_server_key, &refund_pub);
        let refund_tweak =
            tree_tweak(req.from, &resp.lockup_details.swap_tree, &refund_internal)?;
        let refund_session =
            CooperativeSession::new(&refund_server_key, &refund_key, refund_tweak)?;

        let server_msg = digest_from_hex(&info.transaction_hash)?;
        let server_nonce = musig::parse_pub_nonce(&info.pub_nonce)?;
        let (refund_nonce, refund_partial) = refund_session.partial_sign(server_msg, &server_nonce)?;

        let their = self
            .api
            .post_chain_claim(
                swap.provider_id(),
                &ChainClaimRequest {
                    preimage: req.preimage.clone(),
                    signature: PartialSignatureData {
                        pub_nonce: refund_nonce,
                        partial_signature: refund_partial,
                    },
                    to_sign: ChainClaimToSign {
                        index: 0,
                        transaction: bitcoin::consensus::encode::serialize_hex(&tx),
                        pub_nonce: pending.pub_nonce_hex(),
                    },
                },
            )
            .await?;

        let provider_nonce = musig::parse_pub_nonce(&their.pub_nonce)?;
        let provider_partial = musig::parse_partial_signature(&their.partial_signature)?;
        let signature = claim_session.complete(pending, &provider_nonce, provider_partial)?;

        tx.input[0].witness = Witness::from_slice(&[signature.as_slice()]);

        let txid = self
            .api
            .broadcast(
                ChainSymbol::Btc,
                &bitcoin::consensus::encode::serialize_hex(&tx),
            )
            .await?;
        Ok(txid)
    }

    async fn feerate(&self) -> Result<f64> {
        let estimates = self.api.get_fee_estimates().await?;
        estimates
            .get(ChainSymbol::Btc.as_str())
            .copied()
            .context("provider fee estimates miss BTC")
    }
}

/// The provider's claimed preimage must hash to the invoice's payment
/// hash; anything else means the invoice was not actually settled and
/// no signature may be produced.
pub fn verify_claim_preimage(preimage_hex: &str, invoice: &str) -> Result<(), SwapError> {
    let preimage = hex::decode(preimage_hex).context("decode provider preimage")?;
    let payment_hash = payment_hash_from_bolt11(invoice)
        .map_err(|e| SwapError::InvalidInvoice(format!("{e:#}")))?;
    if sha256::Hash::hash(&preimage).to_byte_array() != payment_hash {
        return Err(SwapError::PreimageMismatch);
    }
    Ok(())
}

fn tree_tweak(
    chain: ChainSymbol,
    swap_tree: &crate::provider::api::SwapTree,
    internal: &secp256k1::XOnlyPublicKey,
) -> Result<[u8; 32]> {
    match chain {
        ChainSymbol::Btc => tree::bitcoin_tweak(swap_tree, internal),
        ChainSymbol::Lbtc => tree::liquid_tweak(swap_tree, internal),
    }
}

fn deserialize_tx(tx_hex: &str) -> Result<Transaction> {
    let bytes = hex::decode(tx_hex).context("decode lockup tx hex")?;
    bitcoin::consensus::encode::deserialize(&bytes).context("parse lockup tx")
}

fn digest_from_hex(digest_hex: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(digest_hex).context("decode sighash hex")?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("sighash must be 32 bytes"))
}

/// Locates the lockup output paying to the session's tweaked key.
fn find_swap_output<'a>(
    lockup: &'a Transaction,
    session: &CooperativeSession,
) -> Result<(u32, &'a TxOut), SwapError> {
    let expected = tree::p2tr_script_bytes(&session.output_key());
    lockup
        .output
        .iter()
        .enumerate()
        .find(|(_, out)| out.script_pubkey.as_bytes() == expected.as_slice())
        .map(|(vout, out)| (vout as u32, out))
        .ok_or(SwapError::NoSwapOutput)
}

/// Builds the single-input claim transaction at a fee found by iterating
/// `ceil(vsize × feerate)` until it stops changing. The claim-info fetch
/// and partial-signature exchange both depend on the exact bytes built
/// here, so the transaction is final once this returns.
fn build_claim_tx(
    outpoint: OutPoint,
    utxo_sat: u64,
    destination: ScriptBuf,
    feerate: f64,
) -> Result<Transaction> {
    let assemble = |fee: u64| -> Result<Transaction> {
        let value = utxo_sat
            .checked_sub(fee)
            .context("fee exceeds lockup value")?;
        anyhow::ensure!(value >= DUST_LIMIT_SAT, "claim output below dust limit");
        Ok(Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(value),
                script_pubkey: destination.clone(),
            }],
        })
    };

    let mut fee = 0u64;
    for _ in 0..10 {
        let mut probe = assemble(fee)?;
        probe.input[0].witness = Witness::from_slice(&[[0u8; 64].as_slice()]);
        let next = (probe.vsize() as f64 * feerate).ceil() as u64;
        if next == fee {
            break;
        }
        fee = next;
    }
    assemble(fee)
}

fn keyspend_sighash(tx: &Transaction, prevout: &TxOut) -> Result<[u8; 32]> {
    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .taproot_key_spend_signature_hash(
            0,
            &Prevouts::All(&[prevout.clone()]),
            TapSighashType::Default,
        )
        .context("compute key spend sighash")?;
    Ok(sighash.to_byte_array())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::SecretKey;

    fn session() -> CooperativeSession {
        let secp = secp256k1::Secp256k1::new();
        let provider = SecretKey::from_slice(&[3u8; 32])
            .expect("provider key")
            .public_key(&secp);
        let local = SecretKey::from_slice(&[4u8; 32]).expect("local key");
        CooperativeSession::new(&provider, &local, [7u8; 32]).expect("session")
    }

    fn lockup_paying(script: ScriptBuf, value: u64) -> Transaction {
        Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![],
            output: vec![TxOut {
                value: Amount::from_sat(value),
                script_pubkey: script,
            }],
        }
    }

    #[test]
    fn swap_output_found_by_tweaked_key() {
        let session = session();
        let script = ScriptBuf::from_bytes(tree::p2tr_script_bytes(&session.output_key()).to_vec());
        let lockup = lockup_paying(script, 50_000);
        let (vout, out) = find_swap_output(&lockup, &session).expect("output");
        assert_eq!(vout, 0);
        assert_eq!(out.value.to_sat(), 50_000);
    }

    #[test]
    fn missing_swap_output_is_typed_error() {
        let session = session();
        let lockup = lockup_paying(ScriptBuf::from_bytes(vec![0x51]), 50_000);
        assert!(matches!(
            find_swap_output(&lockup, &session),
            Err(SwapError::NoSwapOutput)
        ));
    }

    #[test]
    fn claim_fee_converges() {
        let outpoint = OutPoint::default();
        let spk = ScriptBuf::from_bytes(vec![0x51, 0x20].into_iter().chain([0u8; 32]).collect());
        let tx = build_claim_tx(outpoint, 100_000, spk.clone(), 2.0).expect("claim tx");
        let fee = 100_000 - tx.output[0].value.to_sat();

        // Re-running the fee search on the built size must not move it.
        let mut probe = tx.clone();
        probe.input[0].witness = Witness::from_slice(&[[0u8; 64].as_slice()]);
        assert_eq!(fee, (probe.vsize() as f64 * 2.0).ceil() as u64);
    }

    #[test]
    fn overlarge_fee_is_rejected() {
        let spk = ScriptBuf::from_bytes(vec![0x51]);
        assert!(build_claim_tx(OutPoint::default(), 100, spk, 5.0).is_err());
    }
}
