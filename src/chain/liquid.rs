//! Cooperative claim construction for Liquid lockups.
//!
//! Differences from the Bitcoin engine: every sighash binds the output
//! commitments and the network's genesis block hash, the lockup output
//! must be unblinded with the swap's blinding key, and the claim pays to
//! a confidential destination with an explicit fee output. Submarine
//! claims never reach this engine; their settlement transaction is the
//! provider's and is signed via the Bitcoin engine.

use std::str::FromStr as _;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use lwk_wollet::elements::confidential::{AssetBlindingFactor, ValueBlindingFactor};
use lwk_wollet::elements::hashes::Hash as _;
use lwk_wollet::elements::secp256k1_zkp;
use lwk_wollet::elements::sighash::{Prevouts, SighashCache};
use lwk_wollet::elements::{
    Address, AddressParams, BlockHash, LockTime, OutPoint, SchnorrSighashType, Script, Sequence,
    Transaction, TxIn, TxInWitness, TxOut, TxOutSecrets, confidential,
};
use zeroize::Zeroize as _;

use crate::chain::tree;
use crate::error::SwapError;
use crate::musig::{self, CooperativeSession};
use crate::provider::ChainSymbol;
use crate::provider::api::{
    ChainClaimRequest, ChainClaimToSign, PartialSignatureData, ProviderApi, ReverseClaimRequest,
};
use crate::swap::{ChainRequest, ReverseRequest, Swap};

pub struct LiquidClaimEngine {
    api: Arc<ProviderApi>,
    params: &'static AddressParams,
    genesis_hash: BlockHash,
}

impl LiquidClaimEngine {
    pub fn new(
        api: Arc<ProviderApi>,
        params: &'static AddressParams,
        genesis_hash: BlockHash,
    ) -> Self {
        Self {
            api,
            params,
            genesis_hash,
        }
    }

    /// Claims a reverse-swap lockup into a confidential output at our
    /// destination address and broadcasts the result.
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
        let tweak = tree::liquid_tweak(&resp.swap_tree, &internal)?;
        let session = CooperativeSession::new(&provider_key, &local_key, tweak)?;

        let blinding_key = resp
            .blinding_key
            .as_deref()
            .context("liquid reverse swap without blinding key")?;

        let lockup = deserialize_tx(lockup_hex)?;
        let (outpoint, lockup_out, secrets) =
            self.find_swap_output(&lockup, &session, blinding_key)?;

        let destination = self.parse_confidential_address(&req.claim_address)?;

        let mut tx = self
            .build_claim_tx(outpoint, &lockup_out, &secrets, &destination)
            .await?;
        let msg32 = self.keyspend_sighash(&tx, &lockup_out)?;
        let pending = session.begin(msg32);

        let their = self
            .api
            .post_reverse_claim(
                swap.provider_id(),
                &ReverseClaimRequest {
                    index: 0,
                    transaction: serialize_tx_hex(&tx),
                    preimage: req.preimage.clone(),
                    pub_nonce: pending.pub_nonce_hex(),
                },
            )
            .await?;

        let provider_nonce = musig::parse_pub_nonce(&their.pub_nonce)?;
        let provider_partial = musig::parse_partial_signature(&their.partial_signature)?;
        let signature = session.complete(pending, &provider_nonce, provider_partial)?;

        tx.input[0].witness.script_witness = vec![signature.to_vec()];

        let txid = self
            .api
            .broadcast(ChainSymbol::Lbtc, &serialize_tx_hex(&tx))
            .await?;
        Ok(txid)
    }

    /// Claims the Liquid leg of a chain swap; key roles as in the
    /// Bitcoin engine (claim key with `claimDetails`, refund key with
    /// `lockupDetails`).
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
        let claim_tweak = tree::liquid_tweak(&resp.claim_details.swap_tree, &claim_internal)?;
        let claim_session = CooperativeSession::new(&claim_server_key, &claim_key, claim_tweak)?;

        let blinding_key = resp
            .claim_details
            .blinding_key
            .as_deref()
            .context("liquid chain swap without blinding key")?;

        let lockup = deserialize_tx(lockup_hex)?;
        let (outpoint, lockup_out, secrets) =
            self.find_swap_output(&lockup, &claim_session, blinding_key)?;

        let destination = self.parse_confidential_address(&req.claim_address)?;

        let mut tx = self
            .build_claim_tx(outpoint, &lockup_out, &secrets, &destination)
            .await?;
        let msg32 = self.keyspend_sighash(&tx, &lockup_out)?;
        let pending = claim_session.begin(msg32);

        let info = self.api.get_chain_claim(swap.provider_id()).await?;
        let refund_server_key =
            musig::public_key_from_hex(&resp.lockup_details.server_public_key)?;
        let refund_key = musig::secret_key_from_hex(&req.refund_key)?;
        let refund_pub = refund_key.public_key(&secp);
        let refund_internal = CooperativeSession::aggregate_key(&refund_server_key, &refund_pub);
        let refund_tweak = match req.from {
            ChainSymbol::Btc => tree::bitcoin_tweak(&resp.lockup_details.swap_tree, &refund_internal)?,
            ChainSymbol::Lbtc => tree::liquid_tweak(&resp.lockup_details.swap_tree, &refund_internal)?,
        };
        let refund_session =
            CooperativeSession::new(&refund_server_key, &refund_key, refund_tweak)?;

        let server_msg: [u8; 32] = hex::decode(&info.transaction_hash)
            .context("decode server sighash hex")?
            .try_into()
            .map_err(|_| anyhow::anyhow!("server sighash must be 32 bytes"))?;
        let server_nonce = musig::parse_pub_nonce(&info.pub_nonce)?;
        let (refund_nonce, refund_partial) =
            refund_session.partial_sign(server_msg, &server_nonce)?;

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
                        transaction: serialize_tx_hex(&tx),
                        pub_nonce: pending.pub_nonce_hex(),
                    },
                },
            )
            .await?;

        let provider_nonce = musig::parse_pub_nonce(&their.pub_nonce)?;
        let provider_partial = musig::parse_partial_signature(&their.partial_signature)?;
        let signature = claim_session.complete(pending, &provider_nonce, provider_partial)?;

        tx.input[0].witness.script_witness = vec![signature.to_vec()];

        let txid = self
            .api
            .broadcast(ChainSymbol::Lbtc, &serialize_tx_hex(&tx))
            .await?;
        Ok(txid)
    }

    /// Locates the lockup output paying to the tweaked key and unblinds
    /// it with the swap's blinding key. Explicit lockups (unblinded, as
    /// regtest providers produce) pass through with zero blinding
    /// factors.
    fn find_swap_output(
        &self,
        lockup: &Transaction,
        session: &CooperativeSession,
        blinding_key_hex: &str,
    ) -> Result<(OutPoint, TxOut, TxOutSecrets), SwapError> {
        let expected = tree::p2tr_script_bytes(&session.output_key());
        let (vout, out) = lockup
            .output
            .iter()
            .enumerate()
            .find(|(_, out)| out.script_pubkey.as_bytes() == expected.as_slice())
            .ok_or(SwapError::NoSwapOutput)?;

        let secrets = match (out.asset, out.value) {
            (confidential::Asset::Explicit(asset), confidential::Value::Explicit(value)) => {
                TxOutSecrets {
                    asset,
                    asset_bf: AssetBlindingFactor::zero(),
                    value,
                    value_bf: ValueBlindingFactor::zero(),
                }
            }
            _ => {
                let mut key_bytes =
                    hex::decode(blinding_key_hex).context("decode blinding key hex")?;
                let blinding_key = secp256k1_zkp::SecretKey::from_slice(&key_bytes)
                    .context("parse blinding key");
                key_bytes.zeroize();

                let zkp = secp256k1_zkp::Secp256k1::new();
                out.unblind(&zkp, blinding_key?)
                    .context("unblind lockup output")?
            }
        };

        Ok((
            OutPoint {
                txid: lockup.txid(),
                vout: vout as u32,
            },
            out.clone(),
            secrets,
        ))
    }

    fn parse_confidential_address(&self, address: &str) -> Result<Address> {
        let address = Address::from_str(address).context("parse claim address")?;
        anyhow::ensure!(
            address.params == self.params,
            "claim address network mismatch"
        );
        anyhow::ensure!(
            address.blinding_pubkey.is_some(),
            "claim address must be confidential"
        );
        Ok(address)
    }

    /// Builds the claim transaction: one confidential output to the
    /// destination, one explicit fee output, fee iterated over the
    /// blinded size until it converges.
    async fn build_claim_tx(
        &self,
        outpoint: OutPoint,
        lockup_out: &TxOut,
        secrets: &TxOutSecrets,
        destination: &Address,
    ) -> Result<Transaction> {
        let feerate = {
            let estimates = self.api.get_fee_estimates().await?;
            estimates
                .get(ChainSymbol::Lbtc.as_str())
                .copied()
                .context("provider fee estimates miss L-BTC")?
        };

        let blinding_pubkey = destination
            .blinding_pubkey
            .context("claim address must be confidential")?;
        let zkp = secp256k1_zkp::Secp256k1::new();

        let assemble = |fee: u64| -> Result<Transaction> {
            let value = secrets
                .value
                .checked_sub(fee)
                .context("fee exceeds lockup value")?;

            let mut rng = bitcoin::key::rand::thread_rng();
            let (blinded, _asset_bf, _value_bf, _ephemeral_key) = TxOut::new_last_confidential(
                &mut rng,
                &zkp,
                value,
                destination.script_pubkey(),
                blinding_pubkey,
                secrets.asset,
                std::slice::from_ref(secrets),
                &[],
            )
            .context("blind claim output")?;

            Ok(Transaction {
                version: 2,
                lock_time: LockTime::ZERO,
                input: vec![TxIn {
                    previous_output: outpoint,
                    is_pegin: false,
                    script_sig: Script::new(),
                    sequence: Sequence::MAX,
                    asset_issuance: Default::default(),
                    witness: TxInWitness::default(),
                }],
                output: vec![blinded, TxOut::new_fee(fee, secrets.asset)],
            })
        };

        let mut fee = 0u64;
        for _ in 0..10 {
            let mut probe = assemble(fee.max(1))?;
            probe.input[0].witness.script_witness = vec![vec![0u8; 64]];
            let vsize = probe.weight().div_ceil(4) as u64;
            let next = ((vsize as f64) * feerate).ceil() as u64;
            if next == fee {
                break;
            }
            fee = next;
        }
        assemble(fee.max(1))
    }

    /// BIP-341 key-spend sighash, Elements flavor: commits to the
    /// confidential amounts/assets of the prevouts and to the network's
    /// genesis block hash.
    fn keyspend_sighash(&self, tx: &Transaction, prevout: &TxOut) -> Result<[u8; 32]> {
        let mut cache = SighashCache::new(tx);
        let sighash = cache
            .taproot_key_spend_signature_hash(
                0,
                &Prevouts::All(&[prevout.clone()]),
                SchnorrSighashType::Default,
                self.genesis_hash,
            )
            .context("compute key spend sighash")?;
        Ok(sighash.to_byte_array())
    }
}

fn deserialize_tx(tx_hex: &str) -> Result<Transaction> {
    let bytes = hex::decode(tx_hex).context("decode lockup tx hex")?;
    lwk_wollet::elements::encode::deserialize(&bytes).context("parse lockup tx")
}

fn serialize_tx_hex(tx: &Transaction) -> String {
    hex::encode(lwk_wollet::elements::encode::serialize(tx))
}
