use anyhow::{Context as _, Result};

use liquid_swap_engine::provider::api::{
    ChainSwapCreated, ChainSwapData, PairLimits, ReverseSwapCreated, SubmarineSwapCreated,
    SwapTree, SwapTreeLeaf,
};
use liquid_swap_engine::provider::{ChainSymbol, SWAP_PROVIDER, SwapProvider};
use liquid_swap_engine::swap::store::SqliteSwapStore;
use liquid_swap_engine::swap::{
    ChainRequest, ReverseRequest, SubmarineRequest, SwapRequest, SwapResponse,
};

fn sample_tree() -> SwapTree {
    SwapTree {
        claim_leaf: SwapTreeLeaf {
            version: 196,
            output: "82012088a914".to_string(),
        },
        refund_leaf: SwapTreeLeaf {
            version: 196,
            output: "a914".to_string(),
        },
    }
}

fn submarine_pair(id: &str) -> (SwapRequest, SwapResponse) {
    (
        SwapRequest::Submarine(SubmarineRequest {
            provider: SWAP_PROVIDER,
            from: ChainSymbol::Lbtc,
            to: ChainSymbol::Btc,
            invoice: format!("lnbc-invoice-{id}"),
            refund_key: "11".repeat(32),
        }),
        SwapResponse::Submarine(SubmarineSwapCreated {
            id: id.to_string(),
            address: format!("lq1-lockup-{id}"),
            swap_tree: sample_tree(),
            claim_public_key: "02".repeat(33),
            timeout_block_height: 1_000,
            expected_amount: 50_000,
            accept_zero_conf: false,
            blinding_key: None,
        }),
    )
}

fn reverse_pair(id: &str) -> (SwapRequest, SwapResponse) {
    (
        SwapRequest::Reverse(ReverseRequest {
            provider: SWAP_PROVIDER,
            from: ChainSymbol::Btc,
            to: ChainSymbol::Lbtc,
            invoice_amount: 50_000,
            claim_key: "22".repeat(32),
            preimage: "33".repeat(32),
            claim_address: "lq1-destination".to_string(),
            covenant: false,
        }),
        SwapResponse::Reverse(ReverseSwapCreated {
            id: id.to_string(),
            invoice: format!("lnbc-reverse-{id}"),
            swap_tree: sample_tree(),
            lockup_address: format!("lq1-lockup-{id}"),
            refund_public_key: "03".repeat(33),
            timeout_block_height: 1_000,
            onchain_amount: 49_500,
            blinding_key: Some("44".repeat(32)),
        }),
    )
}

fn chain_data() -> ChainSwapData {
    ChainSwapData {
        swap_tree: sample_tree(),
        lockup_address: "lockup".to_string(),
        server_public_key: "02".repeat(33),
        timeout_block_height: 1_000,
        amount: 75_000,
        blinding_key: None,
    }
}

fn open_store() -> Result<(tempfile::TempDir, SqliteSwapStore)> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let store =
        SqliteSwapStore::open(dir.path().join("swap_store.sqlite3")).context("open store")?;
    Ok((dir, store))
}

#[test]
fn create_get_complete_roundtrip() -> Result<()> {
    let (_dir, mut store) = open_store()?;

    let (request, response) = submarine_pair("prov-a");
    let swap = store
        .create_swap("account-1", request, response)
        .context("create swap")?;
    assert!(!swap.completed);
    assert_eq!(swap.provider_id(), "prov-a");
    assert_eq!(swap.wallet_account_id, "account-1");
    assert_eq!(swap.request.swap_type(), swap.response.swap_type());

    let got = store
        .get_by_provider_id("prov-a")
        .context("get by provider id")?
        .context("swap missing")?;
    assert_eq!(got.id, swap.id);
    assert!(!got.completed);

    // Submarine swaps are found by the invoice we asked the provider
    // to pay.
    let by_invoice = store
        .get_by_invoice("lnbc-invoice-prov-a")
        .context("get by invoice")?
        .context("swap missing by invoice")?;
    assert_eq!(by_invoice.id, swap.id);

    store.mark_completed(&swap.id).context("mark completed")?;
    let got = store
        .get_by_provider_id("prov-a")?
        .context("swap missing after completion")?;
    assert!(got.completed);

    // Completion is monotonic; marking again is a no-op.
    store.mark_completed(&swap.id).context("mark again")?;

    let err = store.mark_completed("missing").unwrap_err();
    assert!(err.to_string().contains("swap not found"));

    Ok(())
}

#[test]
fn mismatched_pair_never_reaches_disk() -> Result<()> {
    let (_dir, mut store) = open_store()?;

    let (request, _) = submarine_pair("prov-a");
    let (_, response) = reverse_pair("prov-a");
    let err = store
        .create_swap("account-1", request, response)
        .unwrap_err();
    assert!(err.to_string().contains("swap type mismatch"));

    assert!(store.get_by_provider_id("prov-a")?.is_none());
    Ok(())
}

#[test]
fn active_swaps_exclude_completed() -> Result<()> {
    let (_dir, mut store) = open_store()?;

    let (req_a, resp_a) = reverse_pair("prov-a");
    let a = store.create_swap("account-1", req_a, resp_a)?;

    let (req_b, resp_b) = submarine_pair("prov-b");
    store.create_swap("account-1", req_b, resp_b)?;

    let (req_c, resp_c) = (
        SwapRequest::Chain(ChainRequest {
            provider: SWAP_PROVIDER,
            from: ChainSymbol::Btc,
            to: ChainSymbol::Lbtc,
            amount: 75_000,
            claim_key: "55".repeat(32),
            refund_key: "66".repeat(32),
            preimage: "77".repeat(32),
            claim_address: "lq1-destination".to_string(),
        }),
        SwapResponse::Chain(ChainSwapCreated {
            id: "prov-c".to_string(),
            claim_details: chain_data(),
            lockup_details: chain_data(),
        }),
    );
    store.create_swap("account-2", req_c, resp_c)?;

    let active = store.get_active_swaps(SwapProvider::Boltz)?;
    assert_eq!(active.len(), 3);

    store.mark_completed(&a.id)?;
    let active = store.get_active_swaps(SwapProvider::Boltz)?;
    assert_eq!(active.len(), 2);
    assert!(active.iter().all(|s| s.provider_id() != "prov-a"));

    Ok(())
}

#[test]
fn reverse_swaps_are_found_by_provider_invoice() -> Result<()> {
    let (_dir, mut store) = open_store()?;

    let (request, response) = reverse_pair("prov-r");
    let swap = store.create_swap("account-1", request, response)?;

    let got = store
        .get_by_invoice("lnbc-reverse-prov-r")?
        .context("reverse swap missing by invoice")?;
    assert_eq!(got.id, swap.id);
    Ok(())
}

#[test]
fn duplicate_provider_id_is_rejected() -> Result<()> {
    let (_dir, mut store) = open_store()?;

    let (request, response) = reverse_pair("prov-a");
    store.create_swap("account-1", request, response)?;

    let (request, response) = reverse_pair("prov-a");
    assert!(store.create_swap("account-1", request, response).is_err());
    Ok(())
}

#[test]
fn limits_shape_survives_serde() -> Result<()> {
    // The pair endpoints are decoded into this exact shape; pin it.
    let raw = r#"{"minimal": 1000, "maximal": 100000}"#;
    let limits: PairLimits = serde_json::from_str(raw).context("decode limits")?;
    assert_eq!(limits.minimal, 1_000);
    assert_eq!(limits.maximal, 100_000);
    Ok(())
}
