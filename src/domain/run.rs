//! Run record and related types
//!
//! A Run is one attempt at a WorkUnit. It owns every ledger entry and artifact
//! produced under it, and its terminal status is set exactly once.

use serde::{Deserialize, Serialize};

use crate::domain::failure::ErrorKind;
use crate::error::{RatchetError, Result};
use crate::id::{generate_run_id, now_ms};

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Iterations in progress
    Active,
    /// The evaluation gate passed
    Completed,
    /// A step aborted the run, or it was cancelled
    Failed,
    /// A step asked for operator intervention
    Escalated,
    /// The iteration cap was reached without passing
    Exhausted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Active => "ACTIVE",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Escalated => "ESCALATED",
            RunStatus::Exhausted => "EXHAUSTED",
        }
    }

    /// Returns true if the run is in a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Active)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = RatchetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(RunStatus::Active),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            "ESCALATED" => Ok(RunStatus::Escalated),
            "EXHAUSTED" => Ok(RunStatus::Exhausted),
            other => Err(RatchetError::InvalidState(format!("unknown run status: {}", other))),
        }
    }
}

/// Why a run ended in FAILED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// A step with an aborting failure policy failed
    StepAborted { step: String, kind: ErrorKind },
    /// Cancelled between steps
    Cancelled,
    /// The core itself hit an integrity error (ledger conflict, store failure)
    Internal { message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::StepAborted { step, kind } => write!(f, "step '{}' aborted: {}", step, kind),
            FailureReason::Cancelled => write!(f, "CANCELLED"),
            FailureReason::Internal { message } => write!(f, "internal: {}", message),
        }
    }
}

/// One attempt at a work unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    //=== Identity ===
    pub id: String,
    pub work_unit_key: String,

    //=== Runtime State ===
    /// Current iteration (0-indexed)
    pub iteration: u32,
    pub status: RunStatus,
    pub failure: Option<FailureReason>,

    //=== Timestamps ===
    pub created_at: i64,
    pub updated_at: i64,
    pub finished_at: Option<i64>,
}

impl Run {
    /// Start a new ACTIVE run for a work unit.
    pub fn start(work_unit_key: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            id: generate_run_id(),
            work_unit_key: work_unit_key.into(),
            iteration: 0,
            status: RunStatus::Active,
            failure: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Move to the next iteration.
    pub fn advance(&mut self) -> Result<()> {
        self.ensure_active("advance")?;
        self.iteration += 1;
        self.touch();
        Ok(())
    }

    /// Set the terminal status. Fails if the run already has one.
    pub fn finish(&mut self, status: RunStatus) -> Result<()> {
        if !status.is_terminal() {
            return Err(RatchetError::InvalidState(format!(
                "run {} cannot finish as {}",
                self.id, status
            )));
        }
        self.ensure_active("finish")?;
        self.status = status;
        let now = now_ms();
        self.updated_at = now;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Finish as FAILED with a reason.
    pub fn fail(&mut self, reason: FailureReason) -> Result<()> {
        self.finish(RunStatus::Failed)?;
        self.failure = Some(reason);
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = now_ms();
    }

    fn ensure_active(&self, op: &str) -> Result<()> {
        if self.status.is_terminal() {
            return Err(RatchetError::InvalidState(format!(
                "cannot {} run {}: already {}",
                op, self.id, self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_is_active_at_iteration_zero() {
        let run = Run::start("W1");
        assert_eq!(run.status, RunStatus::Active);
        assert_eq!(run.iteration, 0);
        assert_eq!(run.work_unit_key, "W1");
        assert!(run.finished_at.is_none());
    }

    #[test]
    fn test_terminal_status_set_exactly_once() {
        let mut run = Run::start("W1");
        run.finish(RunStatus::Completed).unwrap();
        assert!(run.finished_at.is_some());

        let err = run.finish(RunStatus::Exhausted).unwrap_err();
        assert!(matches!(err, RatchetError::InvalidState(_)));
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn test_cannot_finish_as_active() {
        let mut run = Run::start("W1");
        assert!(run.finish(RunStatus::Active).is_err());
    }

    #[test]
    fn test_cannot_advance_terminal_run() {
        let mut run = Run::start("W1");
        run.advance().unwrap();
        assert_eq!(run.iteration, 1);
        run.fail(FailureReason::Cancelled).unwrap();
        assert!(run.advance().is_err());
        assert_eq!(run.failure, Some(FailureReason::Cancelled));
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [
            RunStatus::Active,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Escalated,
            RunStatus::Exhausted,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_failure_reason_serialization() {
        let reason = FailureReason::StepAborted {
            step: "produce".to_string(),
            kind: ErrorKind::Timeout,
        };
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["reason"], "STEP_ABORTED");
        assert_eq!(json["kind"], "TIMEOUT");
        assert_eq!(reason.to_string(), "step 'produce' aborted: TIMEOUT");
    }
}
