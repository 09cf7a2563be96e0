//! Websocket subscription manager.
//!
//! Owns the single long-lived provider connection. Health is probed
//! with pings every [`HEALTH_CHECK_INTERVAL`]; a missing pong within
//! [`PONG_TIMEOUT`] terminates the socket. Any termination feeds the
//! reconnect loop with backoff `min(30s, 5s x attempts)` and unbounded
//! retries, and every (re)connect re-subscribes all pending swaps from
//! the store, so a subscription queued while disconnected is never
//! lost.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use futures_util::{SinkExt as _, StreamExt as _};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::engine::SwapEngine;

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);
pub const PONG_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts after which repeated reconnect failures are escalated to a
/// warning. The loop itself never gives up.
const RECONNECT_WARN_THRESHOLD: u32 = 5;

/// Connection lifecycle; transitions are logged for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    HealthCheckFailed,
    Error,
    Reconnecting,
}

/// `min(30s, 5s x attempts)` for the given consecutive failure count.
pub fn reconnect_backoff(attempts: u32) -> Duration {
    Duration::from_secs(u64::from(attempts).saturating_mul(5).min(30))
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapUpdate {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub transaction: Option<TransactionData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub hex: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsEvent {
    event: String,
    #[serde(default)]
    args: Option<serde_json::Value>,
}

enum SessionEnd {
    Closed,
    HealthCheckFailed,
}

pub struct SubscriptionManager {
    engine: Arc<SwapEngine>,
    url: String,
    subscribe_rx: mpsc::UnboundedReceiver<String>,
}

impl SubscriptionManager {
    pub fn new(
        engine: Arc<SwapEngine>,
        url: String,
        subscribe_rx: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            engine,
            url,
            subscribe_rx,
        }
    }

    /// Runs the connection loop forever. Only cancellation (dropping
    /// the task) stops it.
    pub async fn run(self) {
        let Self {
            engine,
            url,
            mut subscribe_rx,
        } = self;

        let mut attempts: u32 = 0;
        let mut state;

        loop {
            state = ConnectionState::Connecting;
            tracing::debug!(%url, ?state, "connecting to provider websocket");

            match serve_connection(&engine, &url, &mut subscribe_rx).await {
                Ok(SessionEnd::Closed) => {
                    state = ConnectionState::Error;
                    attempts += 1;
                    tracing::info!(?state, "provider websocket closed");
                }
                Ok(SessionEnd::HealthCheckFailed) => {
                    state = ConnectionState::HealthCheckFailed;
                    attempts += 1;
                    tracing::warn!(?state, "provider websocket missed pong, terminating");
                }
                Err(err) => {
                    state = ConnectionState::Error;
                    attempts += 1;
                    tracing::info!(?state, error = %format!("{err:#}"), "provider websocket error");
                }
            }

            if attempts >= RECONNECT_WARN_THRESHOLD {
                tracing::warn!(attempts, "provider websocket keeps failing, still retrying");
            }

            state = ConnectionState::Reconnecting;
            let delay = reconnect_backoff(attempts);
            tracing::debug!(?state, attempts, delay_secs = delay.as_secs(), "reconnecting");
            tokio::time::sleep(delay).await;
        }
    }
}

async fn serve_connection(
    engine: &Arc<SwapEngine>,
    url: &str,
    subscribe_rx: &mut mpsc::UnboundedReceiver<String>,
) -> Result<SessionEnd> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .context("connect provider websocket")?;
    let (mut sink, mut stream) = ws.split();
    tracing::info!("provider websocket connected");

    // Drain ids queued while disconnected; the store re-subscription
    // below covers them all anyway.
    while subscribe_rx.try_recv().is_ok() {}

    let pending = engine
        .active_swap_ids()
        .context("load pending swaps for re-subscription")?;
    if !pending.is_empty() {
        send_subscribe(&mut sink, &pending).await?;
        tracing::info!(count = pending.len(), "re-subscribed pending swaps");
    }

    let mut ping = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await;

    let mut awaiting_pong: Option<Instant> = None;

    loop {
        let deadline = awaiting_pong.map(|sent_at| sent_at + PONG_TIMEOUT);
        let pong_deadline = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => handle_text(engine, text.as_str()).await,
                Some(Ok(Message::Pong(_))) => awaiting_pong = None,
                Some(Ok(Message::Ping(payload))) => {
                    sink.send(Message::Pong(payload)).await.context("send pong")?;
                }
                Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err).context("read provider websocket"),
            },
            _ = ping.tick() => {
                sink.send(Message::Ping(Vec::new().into()))
                    .await
                    .context("send ping")?;
                if awaiting_pong.is_none() {
                    awaiting_pong = Some(Instant::now());
                }
            }
            _ = pong_deadline => return Ok(SessionEnd::HealthCheckFailed),
            id = subscribe_rx.recv() => match id {
                Some(id) => send_subscribe(&mut sink, &[id]).await?,
                None => return Ok(SessionEnd::Closed),
            },
        }
    }
}

async fn send_subscribe<S>(sink: &mut S, ids: &[String]) -> Result<()>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let op = serde_json::json!({
        "op": "subscribe",
        "channel": "swap.update",
        "args": ids,
    });
    sink.send(Message::Text(op.to_string().into()))
        .await
        .context("send subscribe op")
}

/// Update args are processed serially, in array order; each arg is
/// handled to completion (under its own lock) before the next starts.
async fn handle_text(engine: &Arc<SwapEngine>, text: &str) {
    let event: WsEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(err) => {
            tracing::debug!(error = %err, "unparseable websocket message");
            return;
        }
    };

    if event.event != "update" {
        tracing::debug!(event = %event.event, "ignoring websocket event");
        return;
    }

    let args: Vec<SwapUpdate> = match event.args.map(serde_json::from_value).transpose() {
        Ok(Some(args)) => args,
        Ok(None) => return,
        Err(err) => {
            tracing::warn!(error = %err, "malformed update args");
            return;
        }
    };

    for update in &args {
        engine.handle_status_event(update).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_linearly_then_caps() {
        let observed: Vec<u64> = (1..=6).map(|n| reconnect_backoff(n).as_secs()).collect();
        assert_eq!(observed, vec![5, 10, 15, 20, 25, 30]);
        assert_eq!(reconnect_backoff(7).as_secs(), 30);
        assert_eq!(reconnect_backoff(1_000).as_secs(), 30);
    }

    #[test]
    fn update_args_deserialize() {
        let raw = r#"{
            "event": "update",
            "channel": "swap.update",
            "args": [
                {"id": "abc123", "status": "transaction.mempool",
                 "transaction": {"id": "deadbeef", "hex": "0200"}},
                {"id": "def456", "status": "invoice.set"}
            ]
        }"#;
        let event: WsEvent = serde_json::from_str(raw).expect("parse event");
        assert_eq!(event.event, "update");
        let args: Vec<SwapUpdate> =
            serde_json::from_value(event.args.expect("args")).expect("parse args");
        assert_eq!(args.len(), 2);
        assert_eq!(args[0].id, "abc123");
        assert_eq!(
            args[0].transaction.as_ref().and_then(|t| t.hex.as_deref()),
            Some("0200")
        );
        assert!(args[1].transaction.is_none());
    }
}
