//! Two-party MuSig2 sessions over taproot-tweaked swap keys.
//!
//! The provider publishes the aggregation order: its key first, ours
//! second. Key lists are never sorted here; reordering them changes the
//! aggregate key and breaks the swap tree commitment.

use anyhow::{Context as _, Result};
use secp256k1::musig::{
    AggregatedNonce, KeyAggCache, PartialSignature, PublicNonce, SecretNonce, Session,
    SessionSecretRand, new_nonce_pair,
};
use secp256k1::{All, Keypair, Message, Scalar, Secp256k1, SecretKey, XOnlyPublicKey};
use zeroize::Zeroize as _;

pub fn secret_key_from_hex(hex_key: &str) -> Result<SecretKey> {
    let mut bytes = hex::decode(hex_key).context("decode secret key hex")?;
    let key = SecretKey::from_slice(&bytes).context("parse secret key");
    bytes.zeroize();
    key
}

pub fn public_key_from_hex(hex_key: &str) -> Result<secp256k1::PublicKey> {
    let bytes = hex::decode(hex_key).context("decode public key hex")?;
    secp256k1::PublicKey::from_slice(&bytes).context("parse public key")
}

pub fn parse_pub_nonce(hex_nonce: &str) -> Result<PublicNonce> {
    let bytes = hex::decode(hex_nonce).context("decode public nonce hex")?;
    let array: [u8; 66] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("public nonce must be 66 bytes"))?;
    PublicNonce::from_byte_array(&array).context("parse public nonce")
}

pub fn parse_partial_signature(hex_sig: &str) -> Result<PartialSignature> {
    let bytes = hex::decode(hex_sig).context("decode partial signature hex")?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("partial signature must be 32 bytes"))?;
    PartialSignature::from_byte_array(&array).context("parse partial signature")
}

/// In-memory MuSig2 context for one cooperative spend: aggregate key of
/// `[provider, local]`, taproot-tweaked with the swap tree's root. Nonces
/// and partial signatures only ever live inside this module and are
/// dropped after aggregation or failure; nothing here is persisted.
pub struct CooperativeSession {
    secp: Secp256k1<All>,
    cache: KeyAggCache,
    keypair: Keypair,
    provider_key: secp256k1::PublicKey,
    output_key: XOnlyPublicKey,
}

/// Our half of a signing round awaiting the provider's nonce and partial
/// signature. Holds the secret nonce, so it can be used exactly once.
pub struct PendingPartial {
    sec_nonce: SecretNonce,
    pub_nonce: PublicNonce,
    msg: Message,
}

impl PendingPartial {
    pub fn pub_nonce_hex(&self) -> String {
        hex::encode(self.pub_nonce.serialize())
    }
}

impl CooperativeSession {
    /// `tweak` is the full taproot tweak hash (internal key committed to
    /// the tree's merkle root), computed per chain by `chain::tree`.
    pub fn new(
        provider_key: &secp256k1::PublicKey,
        local_key: &SecretKey,
        tweak: [u8; 32],
    ) -> Result<Self> {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, local_key);
        let local_pub = keypair.public_key();

        let mut cache = KeyAggCache::new(&secp, &[provider_key, &local_pub]);

        let scalar = Scalar::from_be_bytes(tweak)
            .map_err(|_| anyhow::anyhow!("taproot tweak is out of range"))?;
        let tweaked = cache
            .pubkey_xonly_tweak_add(&secp, &scalar)
            .context("apply taproot tweak to aggregate key")?;
        let (output_key, _parity) = tweaked.x_only_public_key();

        Ok(Self {
            secp,
            cache,
            keypair,
            provider_key: *provider_key,
            output_key,
        })
    }

    /// The untweaked aggregate of `[provider, local]`, before tree
    /// commitment. Exposed for tree construction.
    pub fn aggregate_key(provider_key: &secp256k1::PublicKey, local_pub: &secp256k1::PublicKey) -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        KeyAggCache::new(&secp, &[provider_key, local_pub]).agg_pk()
    }

    /// The tweaked output key; the lockup pays to this x-only key.
    pub fn output_key(&self) -> XOnlyPublicKey {
        self.output_key
    }

    fn nonce_pair(&self, msg: Message) -> (SecretNonce, PublicNonce) {
        new_nonce_pair(
            &self.secp,
            SessionSecretRand::from_rng(&mut rand::rng()),
            Some(&self.cache),
            Some(self.keypair.secret_key()),
            self.keypair.public_key(),
            Some(msg),
            None,
        )
    }

    /// One-shot round for flows where the provider's nonce is known up
    /// front (submarine claims, the refund leg of chain swaps): produce
    /// our nonce and partial signature over `msg32`. The aggregate
    /// signature is assembled by the provider.
    pub fn partial_sign(
        &self,
        msg32: [u8; 32],
        provider_nonce: &PublicNonce,
    ) -> Result<(String, String)> {
        let msg = Message::from_digest(msg32);
        let (sec_nonce, pub_nonce) = self.nonce_pair(msg);

        let agg_nonce = AggregatedNonce::new(&self.secp, &[provider_nonce, &pub_nonce]);
        let session = Session::new(&self.secp, &self.cache, agg_nonce, msg);
        let partial = session.partial_sign(&self.secp, sec_nonce, &self.keypair, &self.cache);

        Ok((
            hex::encode(pub_nonce.serialize()),
            hex::encode(partial.serialize()),
        ))
    }

    /// First half of the two-phase round used when we broadcast: commit
    /// to a nonce over the claim transaction's sighash before asking the
    /// provider for its signature of that exact transaction.
    pub fn begin(&self, msg32: [u8; 32]) -> PendingPartial {
        let msg = Message::from_digest(msg32);
        let (sec_nonce, pub_nonce) = self.nonce_pair(msg);
        PendingPartial {
            sec_nonce,
            pub_nonce,
            msg,
        }
    }

    /// Second half: verify the provider's partial signature, add ours,
    /// and aggregate into the final 64-byte key-path signature.
    pub fn complete(
        &self,
        pending: PendingPartial,
        provider_nonce: &PublicNonce,
        provider_partial: PartialSignature,
    ) -> Result<[u8; 64]> {
        let agg_nonce = AggregatedNonce::new(&self.secp, &[provider_nonce, &pending.pub_nonce]);
        let session = Session::new(&self.secp, &self.cache, agg_nonce, pending.msg);

        anyhow::ensure!(
            session.partial_verify(
                &self.secp,
                &self.cache,
                provider_partial,
                *provider_nonce,
                self.provider_key,
            ),
            "provider partial signature failed verification"
        );

        let our_partial =
            session.partial_sign(&self.secp, pending.sec_nonce, &self.keypair, &self.cache);
        let aggregated = session.partial_sig_agg(&[&provider_partial, &our_partial]);

        let final_sig = aggregated
            .verify(&self.secp, &self.output_key, pending.msg.as_ref())
            .map_err(|e| anyhow::anyhow!("aggregated signature failed verification: {e}"))?;
        Ok(*final_sig.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_session() -> (CooperativeSession, SecretKey, secp256k1::PublicKey) {
        let secp = Secp256k1::new();
        let provider_sk = SecretKey::from_slice(&[3u8; 32]).expect("provider key");
        let provider_pk = provider_sk.public_key(&secp);
        let local_sk = SecretKey::from_slice(&[4u8; 32]).expect("local key");
        let session =
            CooperativeSession::new(&provider_pk, &local_sk, [7u8; 32]).expect("session");
        (session, provider_sk, provider_pk)
    }

    #[test]
    fn aggregation_order_is_not_commutative() {
        let secp = Secp256k1::new();
        let a = SecretKey::from_slice(&[5u8; 32]).expect("a").public_key(&secp);
        let b = SecretKey::from_slice(&[6u8; 32]).expect("b").public_key(&secp);
        assert_ne!(
            CooperativeSession::aggregate_key(&a, &b),
            CooperativeSession::aggregate_key(&b, &a),
        );
    }

    #[test]
    fn two_phase_round_trip_with_simulated_provider() {
        let (local, provider_sk, provider_pk) = provider_session();
        let msg32 = [42u8; 32];

        let pending = local.begin(msg32);

        // Simulate the provider: same key order, same tweak, fresh nonce,
        // partial signature over our sighash.
        let secp = Secp256k1::new();
        let provider_kp = Keypair::from_secret_key(&secp, &provider_sk);
        let local_pub = SecretKey::from_slice(&[4u8; 32])
            .expect("local key")
            .public_key(&secp);
        let mut provider_cache = KeyAggCache::new(&secp, &[&provider_pk, &local_pub]);
        let scalar = Scalar::from_be_bytes([7u8; 32]).expect("scalar");
        provider_cache
            .pubkey_xonly_tweak_add(&secp, &scalar)
            .expect("tweak");

        let msg = Message::from_digest(msg32);
        let (provider_sec_nonce, provider_pub_nonce) = new_nonce_pair(
            &secp,
            SessionSecretRand::from_rng(&mut rand::rng()),
            Some(&provider_cache),
            Some(provider_sk),
            provider_pk,
            Some(msg),
            None,
        );

        let our_nonce = parse_pub_nonce(&pending.pub_nonce_hex()).expect("our nonce");
        let agg_nonce = AggregatedNonce::new(&secp, &[&provider_pub_nonce, &our_nonce]);
        let provider_session = Session::new(&secp, &provider_cache, agg_nonce, msg);
        let provider_partial = provider_session.partial_sign(
            &secp,
            provider_sec_nonce,
            &provider_kp,
            &provider_cache,
        );

        let sig = local
            .complete(pending, &provider_pub_nonce, provider_partial)
            .expect("aggregate");
        assert_eq!(sig.len(), 64);
    }

    #[test]
    fn unrelated_provider_partial_is_rejected() {
        let (local, _provider_sk, provider_pk) = provider_session();
        let msg32 = [42u8; 32];
        let pending = local.begin(msg32);

        // A nonce and partial signature from a signer that used a
        // different key must not verify against the session.
        let secp = Secp256k1::new();
        let rogue_sk = SecretKey::from_slice(&[9u8; 32]).expect("rogue key");
        let rogue_pk = rogue_sk.public_key(&secp);
        let rogue_kp = Keypair::from_secret_key(&secp, &rogue_sk);
        let rogue_cache = KeyAggCache::new(&secp, &[&provider_pk, &rogue_pk]);

        let msg = Message::from_digest(msg32);
        let (sec_nonce, pub_nonce) = new_nonce_pair(
            &secp,
            SessionSecretRand::from_rng(&mut rand::rng()),
            Some(&rogue_cache),
            Some(rogue_sk),
            rogue_pk,
            Some(msg),
            None,
        );
        let our_nonce = parse_pub_nonce(&pending.pub_nonce_hex()).expect("our nonce");
        let agg_nonce = AggregatedNonce::new(&secp, &[&pub_nonce, &our_nonce]);
        let rogue_session = Session::new(&secp, &rogue_cache, agg_nonce, msg);
        let rogue_partial = rogue_session.partial_sign(&secp, sec_nonce, &rogue_kp, &rogue_cache);

        assert!(local.complete(pending, &pub_nonce, rogue_partial).is_err());
    }
}
