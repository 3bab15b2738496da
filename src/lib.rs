//! Ratchet - iteration control for self-improving agent loops
//!
//! Ratchet drives each work unit through repeated passes of a fixed step
//! pipeline. Every step result is recorded in a ledger keyed by
//! (run, iteration, step), artifacts are stored as immutable revisions, and
//! an evaluation gate decides after each pass whether the run is done.

pub mod artifact;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod events;
pub mod gate;
pub mod id;
pub mod ledger;
pub mod pipeline;
pub mod runs;
pub mod schema;
pub mod step;

pub use controller::{CancelHandle, ControllerConfig, LoopController, RunSummary, Stores};
pub use error::{RatchetError, Result};
pub use gate::{EvaluationGate, GateVerdict};
pub use pipeline::{IterationOutcome, Pipeline};
pub use step::{Dependency, FailurePolicy, Step, StepContext, StepSpec};
