use anyhow::Result;
use bitcoin::hashes::Hash as _;
use lightning_invoice::{Bolt11Invoice, RouteHintHop};
use std::str::FromStr as _;

pub fn decode_bolt11(invoice: &str) -> Result<Bolt11Invoice> {
    Bolt11Invoice::from_str(invoice).map_err(|e| anyhow::anyhow!("parse BOLT11 invoice: {e:?}"))
}

pub fn payment_hash_from_bolt11(invoice: &str) -> Result<[u8; 32]> {
    Ok(decode_bolt11(invoice)?.payment_hash().to_byte_array())
}

pub fn amount_sat_from_bolt11(invoice: &str) -> Result<Option<u64>> {
    Ok(decode_bolt11(invoice)?
        .amount_milli_satoshis()
        .map(|msat| msat / 1000))
}

/// All routing-hint hops across the invoice's hint tags, in order.
pub fn route_hint_hops(invoice: &Bolt11Invoice) -> Vec<RouteHintHop> {
    invoice
        .route_hints()
        .into_iter()
        .flat_map(|hint| hint.0)
        .collect()
}
