use anyhow::anyhow;

use crate::error::SwapError;
use crate::provider::ChainSymbol;
use crate::provider::api::{PairLimits, PairMap};

/// Looks up the provider-published `{minimal, maximal}` bounds for a
/// chain pair. Missing pairs are a provider/config problem, not a
/// validation failure.
pub fn pair_limits(
    pairs: &PairMap,
    from: ChainSymbol,
    to: ChainSymbol,
) -> Result<PairLimits, SwapError> {
    pairs
        .get(from.as_str())
        .and_then(|m| m.get(to.as_str()))
        .map(|info| info.limits)
        .ok_or_else(|| SwapError::Other(anyhow!("provider offers no {from} -> {to} pair")))
}

/// Rejects out-of-range amounts before any provider mutation call is made.
pub fn validate_amount(limits: PairLimits, amount: u64) -> Result<(), SwapError> {
    if amount < limits.minimal {
        return Err(SwapError::AmountTooSmall {
            amount,
            minimal: limits.minimal,
        });
    }
    if amount > limits.maximal {
        return Err(SwapError::AmountTooLarge {
            amount,
            maximal: limits.maximal,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::api::PairInfo;

    fn pair_map(minimal: u64, maximal: u64) -> PairMap {
        let mut inner = std::collections::HashMap::new();
        inner.insert(
            "L-BTC".to_string(),
            PairInfo {
                limits: PairLimits { minimal, maximal },
                fees: serde_json::Value::Null,
            },
        );
        let mut outer = std::collections::HashMap::new();
        outer.insert("BTC".to_string(), inner);
        outer
    }

    #[test]
    fn amounts_inside_bounds_pass() {
        let limits = pair_limits(&pair_map(1_000, 100_000), ChainSymbol::Btc, ChainSymbol::Lbtc)
            .expect("pair exists");
        assert!(validate_amount(limits, 1_000).is_ok());
        assert!(validate_amount(limits, 50_000).is_ok());
        assert!(validate_amount(limits, 100_000).is_ok());
    }

    #[test]
    fn too_small_amount_is_rejected() {
        let limits = pair_limits(&pair_map(1_000, 100_000), ChainSymbol::Btc, ChainSymbol::Lbtc)
            .expect("pair exists");
        match validate_amount(limits, 999) {
            Err(SwapError::AmountTooSmall { amount, minimal }) => {
                assert_eq!(amount, 999);
                assert_eq!(minimal, 1_000);
            }
            other => panic!("expected AmountTooSmall, got {other:?}"),
        }
    }

    #[test]
    fn too_big_amount_carries_maximal_in_message() {
        let limits = pair_limits(&pair_map(1_000, 100_000), ChainSymbol::Btc, ChainSymbol::Lbtc)
            .expect("pair exists");
        let err = validate_amount(limits, 200_000).expect_err("must fail");
        match &err {
            SwapError::AmountTooLarge { amount, maximal } => {
                assert_eq!(*amount, 200_000);
                assert_eq!(*maximal, 100_000);
            }
            other => panic!("expected AmountTooLarge, got {other:?}"),
        }
        assert!(err.to_string().contains("100000"));
    }

    #[test]
    fn missing_pair_is_not_a_limits_error() {
        let err = pair_limits(&pair_map(1, 2), ChainSymbol::Lbtc, ChainSymbol::Btc)
            .expect_err("pair absent");
        assert!(matches!(err, SwapError::Other(_)));
    }
}
