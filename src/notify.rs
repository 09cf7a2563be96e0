use async_trait::async_trait;

/// Outbound notification seam: the wallet is told about incoming
/// settled amounts. The engine never awaits delivery guarantees;
/// implementations queue as they see fit.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, wallet_account_id: &str, amount_sat: u64);
}

/// Default notifier for the daemon: structured log only.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, wallet_account_id: &str, amount_sat: u64) {
        tracing::info!(
            wallet_account_id = %wallet_account_id,
            amount_sat,
            "incoming swap amount"
        );
    }
}
