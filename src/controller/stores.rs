//! The shared stores a controller works against.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::artifact::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
use crate::error::Result;
use crate::events::{EventSink, JsonlEventLog, MemoryEventLog};
use crate::ledger::{Ledger, MemoryLedger, SqliteLedger};
use crate::runs::{JsonlRunStore, MemoryRunStore, RunStore};

/// File layout of the durable stores under one root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub artifacts: PathBuf,
    pub ledger: PathBuf,
    pub runs: PathBuf,
    pub events: PathBuf,
}

impl StorePaths {
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            artifacts: root.join("artifacts"),
            ledger: root.join("ledger.db"),
            runs: root.join("runs.jsonl"),
            events: root.join("events.jsonl"),
        }
    }
}

/// Artifact store, ledger, run records and event sink, shared by every worker.
#[derive(Clone)]
pub struct Stores {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub ledger: Arc<dyn Ledger>,
    pub runs: Arc<dyn RunStore>,
    pub events: Arc<dyn EventSink>,
}

impl Stores {
    /// Volatile stores, for tests and embedding.
    pub fn in_memory() -> Self {
        Self {
            artifacts: Arc::new(MemoryArtifactStore::new()),
            ledger: Arc::new(MemoryLedger::new()),
            runs: Arc::new(MemoryRunStore::new()),
            events: Arc::new(MemoryEventLog::new()),
        }
    }

    /// Durable stores laid out per [`StorePaths::under`].
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let paths = StorePaths::under(root);
        log::debug!("Opening stores at {:?}", paths);
        Ok(Self {
            artifacts: Arc::new(FsArtifactStore::open(&paths.artifacts)?),
            ledger: Arc::new(SqliteLedger::open(&paths.ledger)?),
            runs: Arc::new(JsonlRunStore::open(&paths.runs)?),
            events: Arc::new(JsonlEventLog::open(&paths.events)?),
        })
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Run;
    use crate::ledger::StepResult;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_paths_under_root() {
        let paths = StorePaths::under("/data");
        assert_eq!(paths.ledger, PathBuf::from("/data/ledger.db"));
        assert_eq!(paths.artifacts, PathBuf::from("/data/artifacts"));
    }

    #[test]
    fn test_open_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let run = Run::start("W1");
        {
            let stores = Stores::open(dir.path()).unwrap();
            stores.runs.create(&run).unwrap();
            stores.ledger.record(&run.id, 0, "produce", StepResult::ok(json!({"n": 1}))).unwrap();
            stores.artifacts.put("runs/x", "draft.md", b"hello").unwrap();
        }

        let stores = Stores::open(dir.path()).unwrap();
        assert_eq!(stores.runs.get(&run.id).unwrap(), run);
        assert_eq!(stores.ledger.read(&run.id, 0, "produce").unwrap().payload["n"], 1);
        assert_eq!(stores.artifacts.revisions("runs/x", "draft.md").unwrap(), vec![0]);
    }
}
