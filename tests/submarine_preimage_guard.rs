use std::time::Duration;

use anyhow::{Context as _, Result};
use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use lightning_invoice::{Bolt11Invoice, Currency, InvoiceBuilder, PaymentSecret};

use liquid_swap_engine::chain::btc::verify_claim_preimage;
use liquid_swap_engine::error::SwapError;

/// Invoice committing to SHA256 of the given preimage.
fn invoice_for_preimage(preimage: &[u8; 32]) -> Result<Bolt11Invoice> {
    let secp = Secp256k1::new();
    let node_key = SecretKey::from_slice(&[41u8; 32]).context("node key")?;

    InvoiceBuilder::new(Currency::Bitcoin)
        .description("submarine swap".to_string())
        .payment_hash(sha256::Hash::hash(preimage))
        .payment_secret(PaymentSecret([42u8; 32]))
        .amount_milli_satoshis(50_000_000)
        .duration_since_epoch(Duration::from_secs(1_700_000_000))
        .min_final_cltv_expiry_delta(80)
        .build_signed(|hash| secp.sign_ecdsa_recoverable(hash, &node_key))
        .map_err(|e| anyhow::anyhow!("sign invoice: {e:?}"))
}

#[test]
fn matching_preimage_passes() -> Result<()> {
    let preimage = [7u8; 32];
    let invoice = invoice_for_preimage(&preimage)?;

    verify_claim_preimage(&hex::encode(preimage), &invoice.to_string())
        .expect("provider holds the real preimage");
    Ok(())
}

#[test]
fn wrong_preimage_aborts_the_claim() -> Result<()> {
    let invoice = invoice_for_preimage(&[7u8; 32])?;

    // A provider that cannot present the settling preimage gets no
    // signature, no matter how well-formed its claim request is.
    let err = verify_claim_preimage(&hex::encode([8u8; 32]), &invoice.to_string()).unwrap_err();
    assert!(matches!(err, SwapError::PreimageMismatch));

    let err = verify_claim_preimage("zz", &invoice.to_string()).unwrap_err();
    assert!(matches!(err, SwapError::Other(_)));
    Ok(())
}
