//! State Ledger
//!
//! Write-once record of every step result, keyed by `(run_id, iteration, step)`.
//! A repeated `record` with an identical result is a no-op; a divergent one is a
//! [`RatchetError::Conflict`]. Only [`Ledger::overwrite`] may replace an entry,
//! and the controller calls it only when it explicitly re-runs an iteration.
//!
//! Two backends:
//! - [`MemoryLedger`]: process-local
//! - [`SqliteLedger`]: one row per key in a SQLite database

mod memory;
mod sqlite;

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::StepError;
use crate::error::{RatchetError, Result};

/// Reserved step name under which the evaluation gate records its verdict.
pub const GATE_STEP: &str = "__gate__";

/// Prefix reserved for core-owned step names.
pub const RESERVED_PREFIX: &str = "__";

/// Outcome status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Ok,
    Error,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Ok => "OK",
            EntryStatus::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = RatchetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "OK" => Ok(EntryStatus::Ok),
            "ERROR" => Ok(EntryStatus::Error),
            other => Err(RatchetError::Storage(format!("unknown entry status: {}", other))),
        }
    }
}

/// The part of an entry a step produces: status plus payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: EntryStatus,
    /// Validated output for OK, serialized [`StepError`] for ERROR
    pub payload: Value,
}

impl StepResult {
    pub fn ok(payload: Value) -> Self {
        Self {
            status: EntryStatus::Ok,
            payload,
        }
    }

    pub fn error(error: &StepError) -> Result<Self> {
        Ok(Self {
            status: EntryStatus::Error,
            payload: serde_json::to_value(error)?,
        })
    }
}

/// One committed step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub run_id: String,
    pub iteration: u32,
    pub step: String,
    pub status: EntryStatus,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(run_id: &str, iteration: u32, step: &str, result: StepResult) -> Self {
        Self {
            run_id: run_id.to_string(),
            iteration,
            step: step.to_string(),
            status: result.status,
            payload: result.payload,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == EntryStatus::Ok
    }

    /// The recorded error detail, for ERROR entries.
    pub fn error(&self) -> Option<StepError> {
        match self.status {
            EntryStatus::Error => serde_json::from_value(self.payload.clone()).ok(),
            EntryStatus::Ok => None,
        }
    }

    /// Whether this entry carries the same result. Timestamps are ignored.
    pub fn same_result(&self, result: &StepResult) -> bool {
        self.status == result.status && self.payload == result.payload
    }

    pub fn key(&self) -> String {
        entry_key(&self.run_id, self.iteration, &self.step)
    }
}

/// Ledger contract shared by every backend.
///
/// Each key is updated atomically; distinct runs never touch each other's keys.
pub trait Ledger: Send + Sync {
    /// Commit a result. Idempotent for an identical result; `Conflict` otherwise.
    fn record(&self, run_id: &str, iteration: u32, step: &str, result: StepResult) -> Result<LedgerEntry>;

    /// Replace whatever is recorded under the key.
    fn overwrite(&self, run_id: &str, iteration: u32, step: &str, result: StepResult) -> Result<LedgerEntry>;

    /// Read one entry. Fails with `NotFound` if absent.
    fn read(&self, run_id: &str, iteration: u32, step: &str) -> Result<LedgerEntry>;

    /// OK entry with the highest iteration, optionally bounded above.
    fn find_latest_ok(&self, run_id: &str, step: &str, max_iteration: Option<u32>) -> Result<Option<LedgerEntry>>;

    /// Every entry of a run, ordered by iteration then commit order.
    fn history(&self, run_id: &str) -> Result<Vec<LedgerEntry>>;

    /// Most recent OK entry for a step across all iterations.
    fn latest(&self, run_id: &str, step: &str) -> Result<LedgerEntry> {
        self.find_latest_ok(run_id, step, None)?
            .ok_or_else(|| RatchetError::NotFound(format!("no OK entry for {}/{}", run_id, step)))
    }

    /// Most recent OK entry at or before `max_iteration`.
    fn latest_through(&self, run_id: &str, step: &str, max_iteration: u32) -> Result<Option<LedgerEntry>> {
        self.find_latest_ok(run_id, step, Some(max_iteration))
    }

    /// Every entry recorded for one step of a run.
    fn step_history(&self, run_id: &str, step: &str) -> Result<Vec<LedgerEntry>> {
        Ok(self.history(run_id)?.into_iter().filter(|e| e.step == step).collect())
    }
}

pub(crate) fn entry_key(run_id: &str, iteration: u32, step: &str) -> String {
    format!("{}/{}/{}", run_id, iteration, step)
}

pub(crate) fn not_found(run_id: &str, iteration: u32, step: &str) -> RatchetError {
    RatchetError::NotFound(format!("ledger entry {}", entry_key(run_id, iteration, step)))
}

pub(crate) fn conflict(run_id: &str, iteration: u32, step: &str) -> RatchetError {
    RatchetError::Conflict(format!(
        "divergent result for ledger entry {}",
        entry_key(run_id, iteration, step)
    ))
}
