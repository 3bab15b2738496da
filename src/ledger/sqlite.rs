//! SQLite-backed ledger.
//!
//! One row per `(run_id, iteration, step)`. The rowid gives commit order for
//! `history`; an overwrite is an upsert, so it keeps the original position.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{EntryStatus, Ledger, LedgerEntry, StepResult, conflict, not_found};
use crate::error::{RatchetError, Result};

const SELECT_COLUMNS: &str = "run_id, iteration, step, status, payload, recorded_at";

/// Durable ledger in a single SQLite database file.
pub struct SqliteLedger {
    db: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLedger").finish_non_exhaustive()
    }
}

impl SqliteLedger {
    /// Open or create a ledger database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path.as_ref())?;
        db.busy_timeout(Duration::from_secs(5))?;
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Ledger in a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ledger (
                run_id TEXT NOT NULL,
                iteration INTEGER NOT NULL,
                step TEXT NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (run_id, iteration, step)
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_run_step ON ledger(run_id, step, iteration);
            "#,
        )?;
        Ok(())
    }

    fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<(String, u32, String, String, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
    }

    fn decode(raw: (String, u32, String, String, String, String)) -> Result<LedgerEntry> {
        let (run_id, iteration, step, status, payload, recorded_at) = raw;
        let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
            .map_err(|e| RatchetError::Storage(format!("bad timestamp '{}': {}", recorded_at, e)))?
            .with_timezone(&Utc);
        Ok(LedgerEntry {
            run_id,
            iteration,
            step,
            status: status.parse()?,
            payload: serde_json::from_str(&payload)?,
            recorded_at,
        })
    }

    fn query_entries(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<LedgerEntry>> {
        let db = self.db.lock().map_err(RatchetError::poisoned)?;
        let mut stmt = db.prepare(sql)?;
        let rows = stmt.query_map(args, Self::row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(Self::decode(row?)?);
        }
        Ok(entries)
    }

    fn write(db: &Connection, entry: &LedgerEntry, upsert: bool) -> Result<()> {
        let sql = if upsert {
            r#"
            INSERT INTO ledger (run_id, iteration, step, status, payload, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (run_id, iteration, step) DO UPDATE SET
                status = excluded.status,
                payload = excluded.payload,
                recorded_at = excluded.recorded_at
            "#
        } else {
            r#"
            INSERT INTO ledger (run_id, iteration, step, status, payload, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#
        };
        db.execute(
            sql,
            params![
                entry.run_id,
                entry.iteration,
                entry.step,
                entry.status.as_str(),
                serde_json::to_string(&entry.payload)?,
                entry.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

impl Ledger for SqliteLedger {
    fn record(&self, run_id: &str, iteration: u32, step: &str, result: StepResult) -> Result<LedgerEntry> {
        let mut db = self.db.lock().map_err(RatchetError::poisoned)?;
        let tx = db.transaction()?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {} FROM ledger WHERE run_id = ?1 AND iteration = ?2 AND step = ?3",
                    SELECT_COLUMNS
                ),
                params![run_id, iteration, step],
                Self::row_to_entry,
            )
            .optional()?;

        if let Some(raw) = existing {
            let existing = Self::decode(raw)?;
            return if existing.same_result(&result) {
                Ok(existing)
            } else {
                Err(conflict(run_id, iteration, step))
            };
        }

        let entry = LedgerEntry::new(run_id, iteration, step, result);
        Self::write(&tx, &entry, false)?;
        tx.commit()?;
        Ok(entry)
    }

    fn overwrite(&self, run_id: &str, iteration: u32, step: &str, result: StepResult) -> Result<LedgerEntry> {
        let db = self.db.lock().map_err(RatchetError::poisoned)?;
        let entry = LedgerEntry::new(run_id, iteration, step, result);
        Self::write(&db, &entry, true)?;
        Ok(entry)
    }

    fn read(&self, run_id: &str, iteration: u32, step: &str) -> Result<LedgerEntry> {
        self.query_entries(
            &format!(
                "SELECT {} FROM ledger WHERE run_id = ?1 AND iteration = ?2 AND step = ?3",
                SELECT_COLUMNS
            ),
            params![run_id, iteration, step],
        )?
        .into_iter()
        .next()
        .ok_or_else(|| not_found(run_id, iteration, step))
    }

    fn find_latest_ok(&self, run_id: &str, step: &str, max_iteration: Option<u32>) -> Result<Option<LedgerEntry>> {
        let max = max_iteration.map(i64::from).unwrap_or(i64::MAX);
        Ok(self
            .query_entries(
                &format!(
                    "SELECT {} FROM ledger WHERE run_id = ?1 AND step = ?2 AND status = ?3 AND iteration <= ?4 \
                     ORDER BY iteration DESC LIMIT 1",
                    SELECT_COLUMNS
                ),
                params![run_id, step, EntryStatus::Ok.as_str(), max],
            )?
            .into_iter()
            .next())
    }

    fn history(&self, run_id: &str) -> Result<Vec<LedgerEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM ledger WHERE run_id = ?1 ORDER BY iteration, rowid",
                SELECT_COLUMNS
            ),
            params![run_id],
        )
    }
}
