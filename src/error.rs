use crate::provider::SwapType;

/// Failures the swap protocol distinguishes by kind.
///
/// Validation errors are fatal to the single operation and never retried;
/// everything else is wrapped as [`SwapError::Other`] and handled by the
/// caller's logging/retry policy.
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    #[error("amount {amount} sat below provider minimum {minimal}")]
    AmountTooSmall { amount: u64, minimal: u64 },

    #[error("amount {amount} sat above provider maximum {maximal}")]
    AmountTooLarge { amount: u64, maximal: u64 },

    #[error("invalid invoice: {0}")]
    InvalidInvoice(String),

    #[error("routing hint signature verification failed")]
    InvalidSignature,

    #[error("routing hint asset does not match the expected settlement asset")]
    InvalidAsset,

    #[error("routing hint amount {hint_sat} sat exceeds invoice amount {invoice_sat} sat")]
    InvalidAmount { hint_sat: u64, invoice_sat: u64 },

    #[error("provider preimage does not hash to the invoice payment hash")]
    PreimageMismatch,

    #[error("lockup transaction has no output for the tweaked swap key")]
    NoSwapOutput,

    #[error("no swap found for provider id {0}")]
    UnknownSwap(String),

    #[error("swap {id} is a {actual:?} swap, event requires {expected:?}")]
    StatusShapeMismatch {
        id: String,
        expected: SwapType,
        actual: SwapType,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
