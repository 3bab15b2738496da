//! In-memory run store.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{RunStore, sort_runs};
use crate::domain::Run;
use crate::error::{RatchetError, Result};

#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<String, Run>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for MemoryRunStore {
    fn create(&self, run: &Run) -> Result<()> {
        let mut runs = self.runs.write().map_err(RatchetError::poisoned)?;
        if runs.contains_key(&run.id) {
            return Err(RatchetError::Conflict(format!("run {} already exists", run.id)));
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    fn update(&self, run: &Run) -> Result<()> {
        let mut runs = self.runs.write().map_err(RatchetError::poisoned)?;
        match runs.get_mut(&run.id) {
            Some(slot) => {
                *slot = run.clone();
                Ok(())
            }
            None => Err(RatchetError::NotFound(format!("run {}", run.id))),
        }
    }

    fn get(&self, run_id: &str) -> Result<Run> {
        let runs = self.runs.read().map_err(RatchetError::poisoned)?;
        runs.get(run_id)
            .cloned()
            .ok_or_else(|| RatchetError::NotFound(format!("run {}", run_id)))
    }

    fn list(&self) -> Result<Vec<Run>> {
        let runs = self.runs.read().map_err(RatchetError::poisoned)?;
        let mut all: Vec<Run> = runs.values().cloned().collect();
        sort_runs(&mut all);
        Ok(all)
    }
}
