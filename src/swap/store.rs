use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context as _, Result};
use rusqlite::{Connection, OptionalExtension as _, Row, params};
use uuid::Uuid;

use super::{Swap, SwapRequest, SwapResponse};
use crate::provider::SwapProvider;

/// Append-only persistence of swap request/response pairs.
///
/// Rows are written once at creation time and mutated exactly once, when
/// the dispatcher flips `completed` on a terminal status. Nothing is ever
/// deleted; the table is the audit trail.
#[derive(Debug)]
pub struct SqliteSwapStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteSwapStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create swap store dir {}", dir.display()))?;
        }

        let conn =
            Connection::open(&path).with_context(|| format!("open sqlite {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("set sqlite busy_timeout")?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("configure sqlite pragmas")?;

        migrate(&conn).context("migrate sqlite schema")?;

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists a request/response pair atomically and returns the new
    /// swap. The pair invariant (`request.swap_type == response.swap_type`)
    /// is enforced here so a mismatched pair can never reach disk.
    pub fn create_swap(
        &mut self,
        wallet_account_id: &str,
        request: SwapRequest,
        response: SwapResponse,
    ) -> Result<Swap> {
        anyhow::ensure!(
            request.swap_type() == response.swap_type(),
            "request/response swap type mismatch: {:?} vs {:?}",
            request.swap_type(),
            response.swap_type(),
        );

        let swap = Swap {
            id: Uuid::new_v4().to_string(),
            wallet_account_id: wallet_account_id.to_string(),
            request,
            response,
            completed: false,
            created_at: unix_now()?,
        };

        let request_json = serde_json::to_string(&swap.request).context("encode swap request")?;
        let response_json =
            serde_json::to_string(&swap.response).context("encode swap response")?;

        self.conn
            .execute(
                r#"
INSERT INTO swaps (
  id,
  wallet_account_id,
  provider,
  swap_type,
  provider_swap_id,
  invoice,
  request_json,
  response_json,
  completed,
  created_at
) VALUES (
  ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9
)
"#,
                params![
                    &swap.id,
                    &swap.wallet_account_id,
                    swap.request.provider().as_str(),
                    swap.swap_type().as_str(),
                    swap.provider_id(),
                    swap.invoice(),
                    &request_json,
                    &response_json,
                    swap.created_at,
                ],
            )
            .with_context(|| format!("insert swap {}", swap.id))?;

        Ok(swap)
    }

    /// Flips `completed` to true. Completion is monotonic: marking an
    /// already-completed swap is a no-op, not an error.
    pub fn mark_completed(&mut self, id: &str) -> Result<()> {
        let rows = self
            .conn
            .execute("UPDATE swaps SET completed = 1 WHERE id = ?1", params![id])
            .with_context(|| format!("mark swap completed {id}"))?;
        anyhow::ensure!(rows == 1, "swap not found: {id}");
        Ok(())
    }

    /// All swaps for the given provider that have not reached a terminal
    /// status, re-subscribed on every websocket (re)connect.
    pub fn get_active_swaps(&self, provider: SwapProvider) -> Result<Vec<Swap>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, wallet_account_id, request_json, response_json, completed, created_at \
                 FROM swaps WHERE completed = 0 AND provider = ?1 ORDER BY created_at",
            )
            .context("prepare active swaps query")?;

        let rows = stmt
            .query_map(params![provider.as_str()], row_to_swap)
            .context("query active swaps")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read swap row")?);
        }
        Ok(out)
    }

    pub fn get_by_provider_id(&self, provider_swap_id: &str) -> Result<Option<Swap>> {
        self.conn
            .query_row(
                "SELECT id, wallet_account_id, request_json, response_json, completed, created_at \
                 FROM swaps WHERE provider_swap_id = ?1",
                params![provider_swap_id],
                row_to_swap,
            )
            .optional()
            .with_context(|| format!("get swap by provider id {provider_swap_id}"))
    }

    pub fn get_by_invoice(&self, invoice: &str) -> Result<Option<Swap>> {
        self.conn
            .query_row(
                "SELECT id, wallet_account_id, request_json, response_json, completed, created_at \
                 FROM swaps WHERE invoice = ?1",
                params![invoice],
                row_to_swap,
            )
            .optional()
            .context("get swap by invoice")
    }
}

fn row_to_swap(row: &Row<'_>) -> rusqlite::Result<Swap> {
    let request_json: String = row.get(2)?;
    let response_json: String = row.get(3)?;

    let request: SwapRequest = serde_json::from_str(&request_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("invalid request json: {e}").into(),
        )
    })?;
    let response: SwapResponse = serde_json::from_str(&response_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("invalid response json: {e}").into(),
        )
    })?;

    Ok(Swap {
        id: row.get(0)?,
        wallet_account_id: row.get(1)?,
        request,
        response,
        completed: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  id TEXT PRIMARY KEY,
  wallet_account_id TEXT NOT NULL,
  provider TEXT NOT NULL,
  swap_type TEXT NOT NULL,
  provider_swap_id TEXT NOT NULL UNIQUE,
  invoice TEXT,
  request_json TEXT NOT NULL,
  response_json TEXT NOT NULL,
  completed INTEGER NOT NULL DEFAULT 0,
  created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS swaps_completed_idx ON swaps(completed, provider);
CREATE INDEX IF NOT EXISTS swaps_invoice_idx ON swaps(invoice);
"#,
    )
    .context("create tables")?;
    Ok(())
}

fn unix_now() -> Result<i64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before unix epoch")?;
    i64::try_from(now.as_secs()).context("timestamp out of range")
}
