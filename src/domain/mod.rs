//! Domain types for Ratchet
//!
//! - WorkUnit: one item of work, immutable once enqueued
//! - Run: one attempt at a work unit, with its terminal status
//! - StepFailure / StepError: typed failures from and about pipeline steps
//! - MetricsVector: the evaluation gate's input
//! - GapRecord: actionable differences against the human reference
//! - EventRecord: audit trail entries

pub mod event;
pub mod failure;
pub mod gap;
pub mod metrics;
pub mod run;
pub mod work_unit;

pub use event::{EventRecord, event_types};
pub use failure::{ErrorKind, FailureCategory, StepError, StepFailure};
pub use gap::{GapCategory, GapRecord, GapReport, Severity};
pub use metrics::{METRICS_FIELD, Metric, MetricsVector};
pub use run::{FailureReason, Run, RunStatus};
pub use work_unit::WorkUnit;
