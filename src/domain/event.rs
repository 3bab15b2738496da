//! Event record types for the audit trail.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{generate_event_id, now_ms};

/// Event type constants
pub mod event_types {
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_RESUMED: &str = "run.resumed";
    pub const ITERATION_STARTED: &str = "iteration.started";
    pub const STEP_FINISHED: &str = "step.finished";
    pub const ITERATION_COMPLETE: &str = "iteration.complete";
    pub const RUN_FINISHED: &str = "run.finished";
    pub const CONTROLLER_DONE: &str = "controller.done";
}

/// General-purpose event log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub id: String,
    /// Event type (e.g., "run.started", "step.finished")
    pub event_type: String,
    pub run_id: Option<String>,
    pub payload: Value,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
}

impl EventRecord {
    pub fn new(event_type: &str, run_id: Option<String>, payload: Value) -> Self {
        Self {
            id: generate_event_id(),
            event_type: event_type.to_string(),
            run_id,
            payload,
            created_at: now_ms(),
        }
    }

    pub fn run_started(run_id: &str, work_unit_key: &str) -> Self {
        Self::new(
            event_types::RUN_STARTED,
            Some(run_id.to_string()),
            serde_json::json!({ "work_unit": work_unit_key }),
        )
    }

    pub fn run_resumed(run_id: &str, iteration: u32) -> Self {
        Self::new(
            event_types::RUN_RESUMED,
            Some(run_id.to_string()),
            serde_json::json!({ "iteration": iteration }),
        )
    }

    pub fn iteration_started(run_id: &str, iteration: u32) -> Self {
        Self::new(
            event_types::ITERATION_STARTED,
            Some(run_id.to_string()),
            serde_json::json!({ "iteration": iteration }),
        )
    }

    pub fn step_finished(
        run_id: &str,
        iteration: u32,
        step: &str,
        status: &str,
        attempts: u32,
        latency_ms: u64,
    ) -> Self {
        Self::new(
            event_types::STEP_FINISHED,
            Some(run_id.to_string()),
            serde_json::json!({
                "iteration": iteration,
                "step": step,
                "status": status,
                "attempts": attempts,
                "latency_ms": latency_ms
            }),
        )
    }

    pub fn iteration_complete(run_id: &str, iteration: u32, passed: bool) -> Self {
        Self::new(
            event_types::ITERATION_COMPLETE,
            Some(run_id.to_string()),
            serde_json::json!({
                "iteration": iteration,
                "passed": passed
            }),
        )
    }

    pub fn run_finished(run_id: &str, status: &str, iterations: u32) -> Self {
        Self::new(
            event_types::RUN_FINISHED,
            Some(run_id.to_string()),
            serde_json::json!({
                "status": status,
                "iterations": iterations
            }),
        )
    }

    pub fn controller_done(runs: usize) -> Self {
        Self::new(
            event_types::CONTROLLER_DONE,
            None,
            serde_json::json!({ "runs": runs }),
        )
    }

    pub fn is_run_event(&self) -> bool {
        self.run_id.is_some()
    }
}
