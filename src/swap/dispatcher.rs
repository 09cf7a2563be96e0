//! Status-event dispatch: maps provider status updates to store,
//! notifier and signing-engine actions, under the per-event lock.

use std::time::Duration;

use anyhow::Context as _;

use crate::engine::SwapEngine;
use crate::error::SwapError;
use crate::provider::ws::SwapUpdate;
use crate::provider::{ChainSymbol, SwapStatus, SwapType};
use crate::swap::{Swap, SwapRequest, SwapResponse};

/// Lease for the per-event lock; renewed automatically while the
/// handler runs.
const EVENT_LOCK_LEASE: Duration = Duration::from_secs(30);

/// What a status event means for a given swap. Computed as pure data so
/// the full table is testable without provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    LogOnly,
    MarkCompleted { success: bool },
    SubmarineClaim,
    NotifyOnly,
    NotifyAndReverseClaim,
    ReverseClaim,
    ChainClaim,
}

/// The status -> action table. Covenant reverse swaps never reach a
/// claim action: the external covenant service claims them, and the
/// notify-only rows keep the user informed.
pub fn plan_action(swap_type: SwapType, covenant: bool, status: &SwapStatus) -> EventAction {
    if status.is_failure_terminal() {
        return EventAction::MarkCompleted { success: false };
    }
    if status.is_success_terminal() {
        return EventAction::MarkCompleted { success: true };
    }

    match status {
        SwapStatus::TransactionClaimPending => EventAction::SubmarineClaim,
        SwapStatus::TransactionMempool => match swap_type {
            SwapType::Submarine => EventAction::LogOnly,
            SwapType::Reverse if covenant => EventAction::NotifyOnly,
            SwapType::Reverse => EventAction::NotifyAndReverseClaim,
            SwapType::Chain => EventAction::NotifyOnly,
        },
        SwapStatus::TransactionServerMempool | SwapStatus::TransactionConfirmed => {
            match swap_type {
                SwapType::Reverse if !covenant => EventAction::ReverseClaim,
                _ => EventAction::LogOnly,
            }
        }
        SwapStatus::TransactionServerConfirmed => match swap_type {
            SwapType::Reverse if !covenant => EventAction::ReverseClaim,
            SwapType::Chain => EventAction::ChainClaim,
            _ => EventAction::LogOnly,
        },
        _ => EventAction::LogOnly,
    }
}

fn covenant_flag(request: &SwapRequest) -> bool {
    match request {
        SwapRequest::Reverse(req) => req.covenant,
        SwapRequest::Submarine(_) | SwapRequest::Chain(_) => false,
    }
}

impl SwapEngine {
    /// Entry point for one websocket update arg. Acquires the
    /// `{provider_swap_id}{status}` lock; a busy lock means another
    /// instance is handling the event and is not an error. Handler
    /// failures are logged and leave the swap pending for a future
    /// matching event.
    pub async fn handle_status_event(&self, update: &SwapUpdate) {
        let status = SwapStatus::parse(&update.status);
        let key = format!("{}{}", update.id, status);

        let handle = match self.lock.try_acquire(&key, EVENT_LOCK_LEASE).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                tracing::debug!(swap = %update.id, status = %status, "event handled elsewhere");
                return;
            }
            Err(err) => {
                tracing::warn!(swap = %update.id, status = %status, error = %err, "lock acquisition failed");
                return;
            }
        };

        if let Err(err) = self.dispatch_status(update, &status).await {
            tracing::warn!(swap = %update.id, status = %status, error = %err, "event handling failed");
        }
        drop(handle);
    }

    /// Executes the action table for one event. Public for tests; use
    /// [`SwapEngine::handle_status_event`] everywhere else.
    pub async fn dispatch_status(
        &self,
        update: &SwapUpdate,
        status: &SwapStatus,
    ) -> Result<(), SwapError> {
        let swap = self
            .with_store(|store| store.get_by_provider_id(&update.id))?
            .ok_or_else(|| SwapError::UnknownSwap(update.id.clone()))?;

        if swap.completed {
            tracing::debug!(swap = %swap.id, status = %status, "swap already completed, ignoring");
            return Ok(());
        }

        let action = plan_action(swap.swap_type(), covenant_flag(&swap.request), status);
        match action {
            EventAction::LogOnly => {
                tracing::info!(swap = %swap.id, status = %status, "status update");
            }
            EventAction::MarkCompleted { success } => {
                self.with_store(|store| store.mark_completed(&swap.id))?;
                tracing::info!(swap = %swap.id, status = %status, success, "swap completed");
            }
            EventAction::SubmarineClaim => {
                let (req, resp) = match (&swap.request, &swap.response) {
                    (SwapRequest::Submarine(req), SwapResponse::Submarine(resp)) => (req, resp),
                    _ => {
                        return Err(SwapError::StatusShapeMismatch {
                            id: swap.id.clone(),
                            expected: SwapType::Submarine,
                            actual: swap.swap_type(),
                        });
                    }
                };
                self.btc.claim_submarine(&swap, req, resp).await?;
                tracing::info!(swap = %swap.id, "posted submarine claim signature");
            }
            EventAction::NotifyOnly => {
                self.notify_incoming(&swap).await;
            }
            EventAction::NotifyAndReverseClaim => {
                self.notify_incoming(&swap).await;
                self.reverse_claim(&swap, update).await?;
            }
            EventAction::ReverseClaim => {
                self.reverse_claim(&swap, update).await?;
            }
            EventAction::ChainClaim => {
                self.chain_claim(&swap, update).await?;
            }
        }
        Ok(())
    }

    async fn notify_incoming(&self, swap: &Swap) {
        let amount_sat = match &swap.response {
            SwapResponse::Reverse(resp) => resp.onchain_amount,
            SwapResponse::Chain(resp) => resp.claim_details.amount,
            SwapResponse::Submarine(resp) => resp.expected_amount,
        };
        self.notifier
            .notify(&swap.wallet_account_id, amount_sat)
            .await;
    }

    async fn reverse_claim(&self, swap: &Swap, update: &SwapUpdate) -> Result<(), SwapError> {
        let (req, resp) = match (&swap.request, &swap.response) {
            (SwapRequest::Reverse(req), SwapResponse::Reverse(resp)) => (req, resp),
            _ => {
                return Err(SwapError::StatusShapeMismatch {
                    id: swap.id.clone(),
                    expected: SwapType::Reverse,
                    actual: swap.swap_type(),
                });
            }
        };

        let lockup_hex = match update.transaction.as_ref().and_then(|tx| tx.hex.clone()) {
            Some(hex) => hex,
            None => self
                .api
                .get_reverse_lockup_tx(swap.provider_id())
                .await
                .context("fetch reverse lockup tx")?,
        };

        let txid = match req.to {
            ChainSymbol::Btc => self.btc.claim_reverse(swap, req, resp, &lockup_hex).await?,
            ChainSymbol::Lbtc => {
                self.liquid
                    .claim_reverse(swap, req, resp, &lockup_hex)
                    .await?
            }
        };
        tracing::info!(swap = %swap.id, claim_txid = %txid, "broadcast reverse claim");
        Ok(())
    }

    async fn chain_claim(&self, swap: &Swap, update: &SwapUpdate) -> Result<(), SwapError> {
        let (req, resp) = match (&swap.request, &swap.response) {
            (SwapRequest::Chain(req), SwapResponse::Chain(resp)) => (req, resp),
            _ => {
                return Err(SwapError::StatusShapeMismatch {
                    id: swap.id.clone(),
                    expected: SwapType::Chain,
                    actual: swap.swap_type(),
                });
            }
        };

        let lockup_hex = update
            .transaction
            .as_ref()
            .and_then(|tx| tx.hex.clone())
            .context("chain swap event without lockup transaction")?;

        let txid = match req.to {
            ChainSymbol::Btc => self.btc.claim_chain(swap, req, resp, &lockup_hex).await?,
            ChainSymbol::Lbtc => self.liquid.claim_chain(swap, req, resp, &lockup_hex).await?,
        };
        tracing::info!(swap = %swap.id, claim_txid = %txid, "broadcast chain claim");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_complete_without_signing() {
        for status in [
            SwapStatus::SwapExpired,
            SwapStatus::InvoiceExpired,
            SwapStatus::InvoiceFailedToPay,
            SwapStatus::TransactionFailed,
            SwapStatus::TransactionRefunded,
            SwapStatus::TransactionLockupFailed,
        ] {
            for swap_type in [SwapType::Submarine, SwapType::Reverse, SwapType::Chain] {
                assert_eq!(
                    plan_action(swap_type, false, &status),
                    EventAction::MarkCompleted { success: false },
                );
            }
        }
        assert_eq!(
            plan_action(SwapType::Reverse, false, &SwapStatus::InvoiceSettled),
            EventAction::MarkCompleted { success: true },
        );
        assert_eq!(
            plan_action(SwapType::Chain, false, &SwapStatus::TransactionClaimed),
            EventAction::MarkCompleted { success: true },
        );
    }

    #[test]
    fn mempool_event_never_claims_chain_swaps() {
        assert_eq!(
            plan_action(SwapType::Chain, false, &SwapStatus::TransactionMempool),
            EventAction::NotifyOnly,
        );
        assert_eq!(
            plan_action(
                SwapType::Chain,
                false,
                &SwapStatus::TransactionServerConfirmed
            ),
            EventAction::ChainClaim,
        );
        assert_eq!(
            plan_action(
                SwapType::Chain,
                false,
                &SwapStatus::TransactionServerMempool
            ),
            EventAction::LogOnly,
        );
    }

    #[test]
    fn mempool_event_notifies_and_claims_reverse_swaps() {
        assert_eq!(
            plan_action(SwapType::Reverse, false, &SwapStatus::TransactionMempool),
            EventAction::NotifyAndReverseClaim,
        );
        assert_eq!(
            plan_action(SwapType::Submarine, false, &SwapStatus::TransactionMempool),
            EventAction::LogOnly,
        );
    }

    #[test]
    fn covenant_reverse_swaps_never_reach_the_signing_engine() {
        for status in [
            SwapStatus::TransactionMempool,
            SwapStatus::TransactionServerMempool,
            SwapStatus::TransactionServerConfirmed,
            SwapStatus::TransactionConfirmed,
        ] {
            let action = plan_action(SwapType::Reverse, true, &status);
            assert!(
                !matches!(
                    action,
                    EventAction::ReverseClaim | EventAction::NotifyAndReverseClaim
                ),
                "covenant swap must not claim on {status}, got {action:?}"
            );
        }
    }

    #[test]
    fn claim_pending_maps_to_submarine_claim() {
        assert_eq!(
            plan_action(
                SwapType::Submarine,
                false,
                &SwapStatus::TransactionClaimPending
            ),
            EventAction::SubmarineClaim,
        );
    }

    #[test]
    fn unknown_statuses_are_log_only() {
        assert_eq!(
            plan_action(
                SwapType::Reverse,
                false,
                &SwapStatus::Unknown("minerfee.paid".to_string())
            ),
            EventAction::LogOnly,
        );
        assert_eq!(
            plan_action(SwapType::Submarine, false, &SwapStatus::InvoiceSet),
            EventAction::LogOnly,
        );
    }
}
