//! In-memory ledger.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{Ledger, LedgerEntry, StepResult, conflict, not_found};
use crate::error::{RatchetError, Result};

type Key = (String, u32, String);

#[derive(Debug, Default)]
struct Inner {
    /// Commit-ordered entries; an overwrite replaces in place
    entries: Vec<LedgerEntry>,
    index: HashMap<Key, usize>,
}

/// Process-local ledger.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: RwLock<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(run_id: &str, iteration: u32, step: &str) -> Key {
        (run_id.to_string(), iteration, step.to_string())
    }
}

impl Ledger for MemoryLedger {
    fn record(&self, run_id: &str, iteration: u32, step: &str, result: StepResult) -> Result<LedgerEntry> {
        let mut inner = self.inner.write().map_err(RatchetError::poisoned)?;
        let key = Self::key(run_id, iteration, step);
        if let Some(&pos) = inner.index.get(&key) {
            let existing = &inner.entries[pos];
            if existing.same_result(&result) {
                return Ok(existing.clone());
            }
            return Err(conflict(run_id, iteration, step));
        }
        let entry = LedgerEntry::new(run_id, iteration, step, result);
        inner.entries.push(entry.clone());
        let pos = inner.entries.len() - 1;
        inner.index.insert(key, pos);
        Ok(entry)
    }

    fn overwrite(&self, run_id: &str, iteration: u32, step: &str, result: StepResult) -> Result<LedgerEntry> {
        let mut inner = self.inner.write().map_err(RatchetError::poisoned)?;
        let key = Self::key(run_id, iteration, step);
        let entry = LedgerEntry::new(run_id, iteration, step, result);
        match inner.index.get(&key).copied() {
            Some(pos) => inner.entries[pos] = entry.clone(),
            None => {
                inner.entries.push(entry.clone());
                let pos = inner.entries.len() - 1;
                inner.index.insert(key, pos);
            }
        }
        Ok(entry)
    }

    fn read(&self, run_id: &str, iteration: u32, step: &str) -> Result<LedgerEntry> {
        let inner = self.inner.read().map_err(RatchetError::poisoned)?;
        inner
            .index
            .get(&Self::key(run_id, iteration, step))
            .map(|&pos| inner.entries[pos].clone())
            .ok_or_else(|| not_found(run_id, iteration, step))
    }

    fn find_latest_ok(&self, run_id: &str, step: &str, max_iteration: Option<u32>) -> Result<Option<LedgerEntry>> {
        let inner = self.inner.read().map_err(RatchetError::poisoned)?;
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.run_id == run_id && e.step == step && e.is_ok())
            .filter(|e| max_iteration.is_none_or(|max| e.iteration <= max))
            .max_by_key(|e| e.iteration)
            .cloned())
    }

    fn history(&self, run_id: &str) -> Result<Vec<LedgerEntry>> {
        let inner = self.inner.read().map_err(RatchetError::poisoned)?;
        let mut entries: Vec<LedgerEntry> = inner.entries.iter().filter(|e| e.run_id == run_id).cloned().collect();
        // stable: keeps commit order within an iteration
        entries.sort_by_key(|e| e.iteration);
        Ok(entries)
    }
}
