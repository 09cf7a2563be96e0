//! Mutual exclusion for status-event handling.
//!
//! Every `(provider_swap_id, status)` pair is guarded by a lease-based
//! lock so that, in a horizontally scaled deployment, at most one
//! process handles a given event. The lock is an injected seam:
//! single-instance deployments use [`ProcessLock`], multi-instance
//! deployments plug a shared-store implementation into the same trait
//! without touching call sites. A busy lock means "being handled
//! elsewhere" and is never surfaced as an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;

/// Held lease. Dropping the handle releases the lock and stops the
/// lease renewal that runs while the handler works.
pub trait LockHandle: Send {}

#[async_trait]
pub trait SwapLock: Send + Sync {
    /// `None` when the key is currently held (possibly by another
    /// process instance).
    async fn try_acquire(&self, key: &str, lease: Duration)
    -> Result<Option<Box<dyn LockHandle>>>;
}

/// In-process lock table with genuine lease semantics: entries expire
/// unless the renewal task keeps extending them, so a crashed handler
/// cannot wedge its key forever.
#[derive(Default)]
pub struct ProcessLock {
    held: Arc<Mutex<HashMap<String, Instant>>>,
}

impl ProcessLock {
    pub fn new() -> Self {
        Self::default()
    }
}

struct ProcessLockHandle {
    key: String,
    held: Arc<Mutex<HashMap<String, Instant>>>,
    renewer: tokio::task::JoinHandle<()>,
}

impl LockHandle for ProcessLockHandle {}

impl Drop for ProcessLockHandle {
    fn drop(&mut self) {
        self.renewer.abort();
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.key);
        }
    }
}

#[async_trait]
impl SwapLock for ProcessLock {
    async fn try_acquire(
        &self,
        key: &str,
        lease: Duration,
    ) -> Result<Option<Box<dyn LockHandle>>> {
        {
            let mut held = self.held.lock().expect("lock table poisoned");
            let now = Instant::now();
            if let Some(expiry) = held.get(key)
                && *expiry > now
            {
                return Ok(None);
            }
            held.insert(key.to_string(), now + lease);
        }

        let renew_key = key.to_string();
        let renew_held = self.held.clone();
        let renewer = tokio::spawn(async move {
            let mut tick = tokio::time::interval(lease / 2);
            tick.tick().await;
            loop {
                tick.tick().await;
                let mut held = match renew_held.lock() {
                    Ok(held) => held,
                    Err(_) => break,
                };
                match held.get_mut(&renew_key) {
                    Some(expiry) => *expiry = Instant::now() + lease,
                    None => break,
                }
            }
        });

        Ok(Some(Box::new(ProcessLockHandle {
            key: key.to_string(),
            held: self.held.clone(),
            renewer,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn busy_key_is_not_an_error() {
        let lock = ProcessLock::new();
        let lease = Duration::from_secs(30);

        let first = lock.try_acquire("swap-a:status", lease).await.expect("acquire");
        assert!(first.is_some());

        let second = lock.try_acquire("swap-a:status", lease).await.expect("acquire");
        assert!(second.is_none());

        let other_key = lock.try_acquire("swap-b:status", lease).await.expect("acquire");
        assert!(other_key.is_some());
    }

    #[tokio::test]
    async fn dropping_the_handle_releases_the_key() {
        let lock = ProcessLock::new();
        let lease = Duration::from_secs(30);

        let handle = lock.try_acquire("swap-a:status", lease).await.expect("acquire");
        drop(handle);

        let again = lock.try_acquire("swap-a:status", lease).await.expect("acquire");
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn expired_lease_without_renewal_can_be_taken_over() {
        let lock = ProcessLock::new();

        // Simulate another instance that died holding the key: an entry
        // in the table with no renewal task behind it.
        lock.held
            .lock()
            .expect("lock table")
            .insert("swap-a:status".to_string(), Instant::now());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let handle = lock
            .try_acquire("swap-a:status", Duration::from_secs(30))
            .await
            .expect("acquire");
        assert!(handle.is_some());
    }
}
