//! Audit event sinks.
//!
//! The controller emits an [`EventRecord`] for every run, iteration and step
//! transition. Emission failures are logged and never fail the run.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::domain::EventRecord;
use crate::error::{RatchetError, Result};

/// Destination for audit events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &EventRecord) -> Result<()>;
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: &EventRecord) -> Result<()> {
        Ok(())
    }
}

/// Keeps events in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<EventRecord>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events of one type, optionally restricted to a run.
    pub fn of_type(&self, event_type: &str, run_id: Option<&str>) -> Vec<EventRecord> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .filter(|e| run_id.is_none() || e.run_id.as_deref() == run_id)
            .collect()
    }
}

impl EventSink for MemoryEventLog {
    fn emit(&self, event: &EventRecord) -> Result<()> {
        self.events.lock().map_err(RatchetError::poisoned)?.push(event.clone());
        Ok(())
    }
}

/// Appends events to a JSONL file.
#[derive(Debug)]
pub struct JsonlEventLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlEventLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back the events in a log file, optionally filtered by run.
    pub fn read(path: impl AsRef<Path>, run_id: Option<&str>) -> Result<Vec<EventRecord>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut events = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: EventRecord = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("Skipping malformed event at {}:{}: {}", path.display(), lineno + 1, e);
                    continue;
                }
            };
            if run_id.is_none() || event.run_id.as_deref() == run_id {
                events.push(event);
            }
        }
        Ok(events)
    }
}

impl EventSink for JsonlEventLog {
    fn emit(&self, event: &EventRecord) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let mut file = self.file.lock().map_err(RatchetError::poisoned)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
