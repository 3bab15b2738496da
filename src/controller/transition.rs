//! Controller state machine.
//!
//! ```text
//! PENDING_WORK -> ITERATING -> { ADVANCE, ESCALATED, EXHAUSTED } -> PENDING_WORK | DONE
//! ```

use crate::domain::{RunStatus, WorkUnit};

/// Worker state.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerState {
    /// Waiting to dequeue the next work unit
    PendingWork,
    /// Driving a run for this work unit
    Iterating(WorkUnit),
    /// Queue drained; no further iterations ever run
    Done,
}

/// Decision after a completed pipeline pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Gate passed
    Complete,
    /// Gate failed and a step asked for an operator
    Escalate,
    /// Gate failed; run the next iteration
    Iterate,
    /// Gate failed on the last allowed iteration
    Exhaust,
}

impl Transition {
    /// Terminal run status this transition leads to, if any.
    pub fn terminal_status(&self) -> Option<RunStatus> {
        match self {
            Transition::Complete => Some(RunStatus::Completed),
            Transition::Escalate => Some(RunStatus::Escalated),
            Transition::Exhaust => Some(RunStatus::Exhausted),
            Transition::Iterate => None,
        }
    }
}

/// Decide what follows iteration `iteration` (0-based).
///
/// A pass wins over an escalation request in the same iteration.
pub fn decide(passed: bool, escalate: bool, iteration: u32, max_iterations: u32) -> Transition {
    if passed {
        Transition::Complete
    } else if escalate {
        Transition::Escalate
    } else if iteration.saturating_add(1) < max_iterations {
        Transition::Iterate
    } else {
        Transition::Exhaust
    }
}
