//! Run records
//!
//! Persistence for [`Run`] records. The controller creates a run when it
//! dequeues a work unit, updates it after every iteration, and sets its
//! terminal status exactly once.

mod jsonl;
mod memory;

pub use jsonl::JsonlRunStore;
pub use memory::MemoryRunStore;

use crate::domain::{Run, RunStatus};
use crate::error::Result;

/// Run persistence contract.
pub trait RunStore: Send + Sync {
    /// Persist a new run. Fails with `Conflict` if the id is taken.
    fn create(&self, run: &Run) -> Result<()>;

    /// Replace a stored run. Fails with `NotFound` if it was never created.
    fn update(&self, run: &Run) -> Result<()>;

    /// Fetch a run by id. Fails with `NotFound` if absent.
    fn get(&self, run_id: &str) -> Result<Run>;

    /// All runs, oldest first.
    fn list(&self) -> Result<Vec<Run>>;

    /// Runs in the given status, oldest first.
    fn list_by_status(&self, status: RunStatus) -> Result<Vec<Run>> {
        Ok(self.list()?.into_iter().filter(|r| r.status == status).collect())
    }

    /// Runs for a work unit, oldest first.
    fn list_by_work_unit(&self, key: &str) -> Result<Vec<Run>> {
        Ok(self.list()?.into_iter().filter(|r| r.work_unit_key == key).collect())
    }
}

/// Order runs oldest first, breaking ties by id.
pub(crate) fn sort_runs(runs: &mut [Run]) {
    runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
