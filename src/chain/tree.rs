//! Taproot swap-tree commitments.
//!
//! The provider serializes a swap tree as a claim leaf and a refund leaf.
//! The merkle root commits the aggregate MuSig2 key to those script
//! paths; Bitcoin and Liquid use different tagged hashes and leaf
//! versions, so each chain gets its own derivation.

use anyhow::{Context as _, Result};
use secp256k1::XOnlyPublicKey;

use crate::provider::api::SwapTree;

/// Tweak hash committing `internal_key` to the tree, for Bitcoin L1
/// lockups.
pub fn bitcoin_tweak(tree: &SwapTree, internal_key: &XOnlyPublicKey) -> Result<[u8; 32]> {
    use bitcoin::taproot::{LeafVersion, TapLeafHash, TapNodeHash, TapTweakHash};

    let leaf = |version: u8, output: &str| -> Result<TapNodeHash> {
        let script = bitcoin::ScriptBuf::from_bytes(
            hex::decode(output).context("decode swap tree leaf script")?,
        );
        let version = LeafVersion::from_consensus(version)
            .map_err(|e| anyhow::anyhow!("invalid leaf version: {e}"))?;
        Ok(TapNodeHash::from(TapLeafHash::from_script(&script, version)))
    };

    let claim = leaf(tree.claim_leaf.version, &tree.claim_leaf.output)?;
    let refund = leaf(tree.refund_leaf.version, &tree.refund_leaf.output)?;
    let root = TapNodeHash::from_node_hashes(claim, refund);

    let internal = bitcoin::XOnlyPublicKey::from_slice(&internal_key.serialize())
        .context("convert aggregate key")?;
    use bitcoin::hashes::Hash as _;
    Ok(TapTweakHash::from_key_and_tweak(internal, Some(root)).to_byte_array())
}

/// Tweak hash for Liquid lockups. Elements taproot uses its own hash
/// tags (`TapLeaf/elements`, `TapTweak/elements`) and leaf version, so
/// this must never be mixed up with [`bitcoin_tweak`].
pub fn liquid_tweak(tree: &SwapTree, internal_key: &XOnlyPublicKey) -> Result<[u8; 32]> {
    use lwk_wollet::elements::taproot::{LeafVersion, TapLeafHash, TapNodeHash, TapTweakHash};

    let leaf = |version: u8, output: &str| -> Result<TapNodeHash> {
        let script = lwk_wollet::elements::Script::from(
            hex::decode(output).context("decode swap tree leaf script")?,
        );
        let version = LeafVersion::from_u8(version)
            .map_err(|e| anyhow::anyhow!("invalid leaf version: {e}"))?;
        Ok(TapNodeHash::from(TapLeafHash::from_script(&script, version)))
    };

    let claim = leaf(tree.claim_leaf.version, &tree.claim_leaf.output)?;
    let refund = leaf(tree.refund_leaf.version, &tree.refund_leaf.output)?;
    let root = TapNodeHash::from_node_hashes(claim, refund);

    let internal =
        lwk_wollet::elements::bitcoin::XOnlyPublicKey::from_slice(&internal_key.serialize())
            .context("convert aggregate key")?;
    use lwk_wollet::elements::bitcoin::hashes::Hash as _;
    Ok(TapTweakHash::from_key_and_tweak(internal, Some(root)).to_byte_array())
}

/// `OP_1 <32-byte output key>` — the script every taproot lockup output
/// carries, on either chain. Used to locate our output in a lockup
/// transaction.
pub fn p2tr_script_bytes(output_key: &XOnlyPublicKey) -> [u8; 34] {
    let mut script = [0u8; 34];
    script[0] = 0x51;
    script[1] = 0x20;
    script[2..].copy_from_slice(&output_key.serialize());
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::api::SwapTreeLeaf;
    use secp256k1::{Secp256k1, SecretKey};

    fn sample_tree(btc: bool) -> SwapTree {
        // Arbitrary but well-formed scripts; only the hashes matter here.
        let version = if btc { 0xc0 } else { 0xc4 };
        SwapTree {
            claim_leaf: SwapTreeLeaf {
                version,
                output: "82012088a91451ded7f2eb1e6ae00fe15c6cbaed44e5db23bbbd8851".to_string(),
            },
            refund_leaf: SwapTreeLeaf {
                version,
                output: "a91451ded7f2eb1e6ae00fe15c6cbaed44e5db23bbbd87".to_string(),
            },
        }
    }

    fn internal_key() -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        SecretKey::from_slice(&[11u8; 32])
            .expect("key")
            .x_only_public_key(&secp)
            .0
    }

    #[test]
    fn tweaks_are_deterministic() {
        let key = internal_key();
        let a = bitcoin_tweak(&sample_tree(true), &key).expect("tweak");
        let b = bitcoin_tweak(&sample_tree(true), &key).expect("tweak");
        assert_eq!(a, b);
    }

    #[test]
    fn chains_commit_differently() {
        let key = internal_key();
        let btc = bitcoin_tweak(&sample_tree(true), &key).expect("btc tweak");
        let liquid = liquid_tweak(&sample_tree(false), &key).expect("liquid tweak");
        assert_ne!(btc, liquid);
    }

    #[test]
    fn tweak_depends_on_tree() {
        let key = internal_key();
        let mut other = sample_tree(true);
        other.claim_leaf.output = "51".to_string();
        assert_ne!(
            bitcoin_tweak(&sample_tree(true), &key).expect("tweak"),
            bitcoin_tweak(&other, &key).expect("tweak"),
        );
    }

    #[test]
    fn p2tr_script_shape() {
        let key = internal_key();
        let script = p2tr_script_bytes(&key);
        assert_eq!(script[0], 0x51);
        assert_eq!(script[1], 0x20);
        assert_eq!(&script[2..], key.serialize().as_slice());
    }
}
