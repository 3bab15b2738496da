//! JSONL-backed run store with an in-memory index.
//!
//! Every create/update appends the full record as one line; on open the log
//! is replayed and the last line per id wins.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::{RunStore, sort_runs};
use crate::domain::Run;
use crate::error::{RatchetError, Result};

#[derive(Debug)]
pub struct JsonlRunStore {
    path: PathBuf,
    cache: RwLock<HashMap<String, Run>>,
}

impl JsonlRunStore {
    /// Open the log at `path`, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let cache = Self::replay(&path)?;
        log::debug!("Loaded {} runs from {}", cache.len(), path.display());
        Ok(Self {
            path,
            cache: RwLock::new(cache),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn replay(path: &Path) -> Result<HashMap<String, Run>> {
        let mut runs = HashMap::new();
        if !path.exists() {
            return Ok(runs);
        }
        let reader = BufReader::new(File::open(path)?);
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Run>(&line) {
                Ok(run) => {
                    runs.insert(run.id.clone(), run);
                }
                // A torn final line from a crash mid-append
                Err(e) => log::warn!("Skipping malformed run record at {}:{}: {}", path.display(), lineno + 1, e),
            }
        }
        Ok(runs)
    }

    fn append(&self, run: &Run) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(run)?)?;
        Ok(())
    }
}

impl RunStore for JsonlRunStore {
    fn create(&self, run: &Run) -> Result<()> {
        let mut cache = self.cache.write().map_err(RatchetError::poisoned)?;
        if cache.contains_key(&run.id) {
            return Err(RatchetError::Conflict(format!("run {} already exists", run.id)));
        }
        // Append first: the file is the source of truth
        self.append(run)?;
        cache.insert(run.id.clone(), run.clone());
        Ok(())
    }

    fn update(&self, run: &Run) -> Result<()> {
        let mut cache = self.cache.write().map_err(RatchetError::poisoned)?;
        if !cache.contains_key(&run.id) {
            return Err(RatchetError::NotFound(format!("run {}", run.id)));
        }
        self.append(run)?;
        cache.insert(run.id.clone(), run.clone());
        Ok(())
    }

    fn get(&self, run_id: &str) -> Result<Run> {
        let cache = self.cache.read().map_err(RatchetError::poisoned)?;
        cache
            .get(run_id)
            .cloned()
            .ok_or_else(|| RatchetError::NotFound(format!("run {}", run_id)))
    }

    fn list(&self) -> Result<Vec<Run>> {
        let cache = self.cache.read().map_err(RatchetError::poisoned)?;
        let mut runs: Vec<Run> = cache.values().cloned().collect();
        sort_runs(&mut runs);
        Ok(runs)
    }
}
