pub mod api;
pub mod ws;

use serde::{Deserialize, Serialize};

/// The swap provider this engine speaks to. Single-variant today; the
/// `(provider, swap_type)` pair is still matched exhaustively so a second
/// provider cannot be added without covering every handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapProvider {
    Boltz,
}

pub const SWAP_PROVIDER: SwapProvider = SwapProvider::Boltz;

impl SwapProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapProvider::Boltz => "boltz",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "boltz" => Some(SwapProvider::Boltz),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapType {
    Submarine,
    Reverse,
    Chain,
}

impl SwapType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapType::Submarine => "submarine",
            SwapType::Reverse => "reverse",
            SwapType::Chain => "chain",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submarine" => Some(SwapType::Submarine),
            "reverse" => Some(SwapType::Reverse),
            "chain" => Some(SwapType::Chain),
            _ => None,
        }
    }
}

/// Chain symbols as the provider API names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainSymbol {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "L-BTC")]
    Lbtc,
}

impl ChainSymbol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainSymbol::Btc => "BTC",
            ChainSymbol::Lbtc => "L-BTC",
        }
    }
}

impl std::fmt::Display for ChainSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Swap status vocabulary pushed over the provider websocket.
///
/// Statuses the provider may add later parse as [`SwapStatus::Unknown`]
/// and are logged, never acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapStatus {
    SwapCreated,
    InvoiceSet,
    InvoiceSettled,
    InvoiceExpired,
    InvoiceFailedToPay,
    SwapExpired,
    TransactionMempool,
    TransactionConfirmed,
    TransactionServerMempool,
    TransactionServerConfirmed,
    TransactionClaimPending,
    TransactionClaimed,
    TransactionFailed,
    TransactionRefunded,
    TransactionLockupFailed,
    Unknown(String),
}

impl SwapStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "swap.created" => SwapStatus::SwapCreated,
            "invoice.set" => SwapStatus::InvoiceSet,
            "invoice.settled" => SwapStatus::InvoiceSettled,
            "invoice.expired" => SwapStatus::InvoiceExpired,
            "invoice.failedToPay" => SwapStatus::InvoiceFailedToPay,
            "swap.expired" => SwapStatus::SwapExpired,
            "transaction.mempool" => SwapStatus::TransactionMempool,
            "transaction.confirmed" => SwapStatus::TransactionConfirmed,
            "transaction.server.mempool" => SwapStatus::TransactionServerMempool,
            "transaction.server.confirmed" => SwapStatus::TransactionServerConfirmed,
            "transaction.claim.pending" => SwapStatus::TransactionClaimPending,
            "transaction.claimed" => SwapStatus::TransactionClaimed,
            "transaction.failed" => SwapStatus::TransactionFailed,
            "transaction.refunded" => SwapStatus::TransactionRefunded,
            "transaction.lockupFailed" => SwapStatus::TransactionLockupFailed,
            other => SwapStatus::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SwapStatus::SwapCreated => "swap.created",
            SwapStatus::InvoiceSet => "invoice.set",
            SwapStatus::InvoiceSettled => "invoice.settled",
            SwapStatus::InvoiceExpired => "invoice.expired",
            SwapStatus::InvoiceFailedToPay => "invoice.failedToPay",
            SwapStatus::SwapExpired => "swap.expired",
            SwapStatus::TransactionMempool => "transaction.mempool",
            SwapStatus::TransactionConfirmed => "transaction.confirmed",
            SwapStatus::TransactionServerMempool => "transaction.server.mempool",
            SwapStatus::TransactionServerConfirmed => "transaction.server.confirmed",
            SwapStatus::TransactionClaimPending => "transaction.claim.pending",
            SwapStatus::TransactionClaimed => "transaction.claimed",
            SwapStatus::TransactionFailed => "transaction.failed",
            SwapStatus::TransactionRefunded => "transaction.refunded",
            SwapStatus::TransactionLockupFailed => "transaction.lockupFailed",
            SwapStatus::Unknown(s) => s,
        }
    }

    /// Statuses that end a swap's lifecycle without any signing.
    pub fn is_failure_terminal(&self) -> bool {
        matches!(
            self,
            SwapStatus::SwapExpired
                | SwapStatus::InvoiceExpired
                | SwapStatus::InvoiceFailedToPay
                | SwapStatus::TransactionFailed
                | SwapStatus::TransactionRefunded
                | SwapStatus::TransactionLockupFailed
        )
    }

    /// Statuses that end a swap's lifecycle successfully.
    pub fn is_success_terminal(&self) -> bool {
        matches!(
            self,
            SwapStatus::InvoiceSettled | SwapStatus::TransactionClaimed
        )
    }
}

impl std::fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
