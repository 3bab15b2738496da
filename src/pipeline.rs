//! Sequential Pipeline
//!
//! A fixed, ordered list of steps run once per iteration in declaration
//! order. Each step's input is resolved from the ledger according to its
//! declared dependencies; no step starts before its predecessor's entry is
//! committed.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::controller::CancelToken;
use crate::domain::{ErrorKind, EventRecord, StepError, WorkUnit};
use crate::error::{RatchetError, Result};
use crate::events::EventSink;
use crate::ledger::{GATE_STEP, Ledger, RESERVED_PREFIX};
use crate::step::{Dependency, DependencySource, Disposition, Step, StepExecutor, StepOutcome, StepSpec, WriteMode};

/// Output field a step sets to request operator intervention.
pub const ESCALATE_FIELD: &str = "escalate";

struct PipelineStep {
    spec: StepSpec,
    step: Arc<dyn Step>,
}

/// How one pipeline pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Every step ran; `skipped` lists steps that ended in ERROR under SKIP
    Completed { skipped: Vec<String> },
    /// A step ended in ERROR under an aborting policy; later steps never ran
    Aborted { step: String, kind: ErrorKind },
    /// Cancellation was observed before `before_step` started
    Cancelled { before_step: String },
}

/// Validated, immutable pipeline definition.
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    evaluation_step: String,
    escalation_step: Option<String>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.step_names())
            .field("evaluation_step", &self.evaluation_step)
            .field("escalation_step", &self.escalation_step)
            .finish()
    }
}

/// Builder for [`Pipeline`]; all checks run in [`PipelineBuilder::build`].
#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<PipelineStep>,
    evaluation_step: Option<String>,
    escalation_step: Option<String>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn step(mut self, spec: StepSpec, step: impl Step + 'static) -> Self {
        self.steps.push(PipelineStep {
            spec,
            step: Arc::new(step),
        });
        self
    }

    /// Append a step backed by a shared collaborator.
    pub fn shared_step(mut self, spec: StepSpec, step: Arc<dyn Step>) -> Self {
        self.steps.push(PipelineStep { spec, step });
        self
    }

    /// Step whose output carries the metrics vector.
    pub fn evaluation_step(mut self, name: impl Into<String>) -> Self {
        self.evaluation_step = Some(name.into());
        self
    }

    /// Step whose output may carry `escalate: true`.
    pub fn escalation_step(mut self, name: impl Into<String>) -> Self {
        self.escalation_step = Some(name.into());
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        if self.steps.is_empty() {
            return Err(RatchetError::InvalidPipeline("pipeline has no steps".to_string()));
        }

        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (index, entry) in self.steps.iter().enumerate() {
            let name = entry.spec.name.as_str();
            if name.is_empty() {
                return Err(RatchetError::InvalidPipeline(format!("step {} has an empty name", index)));
            }
            if name.starts_with(RESERVED_PREFIX) {
                return Err(RatchetError::InvalidPipeline(format!(
                    "step name '{}' uses the reserved prefix '{}'",
                    name, RESERVED_PREFIX
                )));
            }
            if positions.insert(name, index).is_some() {
                return Err(RatchetError::InvalidPipeline(format!("duplicate step name: {}", name)));
            }
        }

        for (index, entry) in self.steps.iter().enumerate() {
            for dep in &entry.spec.dependencies {
                let target = positions.get(dep.step.as_str()).copied();
                match (dep.source, target) {
                    (DependencySource::LatestOk, None) if dep.step == GATE_STEP => {}
                    (_, None) => {
                        return Err(RatchetError::InvalidPipeline(format!(
                            "step '{}' depends on unknown step '{}'",
                            entry.spec.name, dep.step
                        )));
                    }
                    (DependencySource::CurrentIteration, Some(pos)) if pos >= index => {
                        return Err(RatchetError::InvalidPipeline(format!(
                            "step '{}' reads '{}' from the current iteration but it does not run earlier",
                            entry.spec.name, dep.step
                        )));
                    }
                    _ => {}
                }
            }
        }

        let evaluation_step = self
            .evaluation_step
            .ok_or_else(|| RatchetError::InvalidPipeline("no evaluation step designated".to_string()))?;
        if !positions.contains_key(evaluation_step.as_str()) {
            return Err(RatchetError::InvalidPipeline(format!(
                "evaluation step '{}' is not in the pipeline",
                evaluation_step
            )));
        }
        if let Some(escalation) = &self.escalation_step {
            if !positions.contains_key(escalation.as_str()) {
                return Err(RatchetError::InvalidPipeline(format!(
                    "escalation step '{}' is not in the pipeline",
                    escalation
                )));
            }
        }

        Ok(Pipeline {
            steps: self.steps,
            evaluation_step,
            escalation_step: self.escalation_step,
        })
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.spec.name.as_str()).collect()
    }

    pub fn evaluation_step(&self) -> &str {
        &self.evaluation_step
    }

    pub fn escalation_step(&self) -> Option<&str> {
        self.escalation_step.as_deref()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.spec.name == name)
    }

    /// Run every step once for `iteration`, in order.
    ///
    /// Cancellation is checked before each step, never during one.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_iteration(
        &self,
        executor: &StepExecutor,
        ledger: &dyn Ledger,
        events: &dyn EventSink,
        run_id: &str,
        unit: &WorkUnit,
        iteration: u32,
        mode: WriteMode,
        cancel: &CancelToken,
    ) -> Result<IterationOutcome> {
        let mut skipped = Vec::new();

        for (index, entry) in self.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                log::info!("Run {} cancelled before step '{}'", run_id, entry.spec.name);
                return Ok(IterationOutcome::Cancelled {
                    before_step: entry.spec.name.clone(),
                });
            }

            let outcome = match self.resolve_input(ledger, run_id, unit, iteration, index)? {
                Ok(input) => {
                    executor
                        .execute(&entry.spec, entry.step.as_ref(), run_id, iteration, input, mode)
                        .await?
                }
                Err(missing) => executor.fail_locally(&entry.spec, run_id, iteration, missing, mode)?,
            };
            emit_step_finished(events, run_id, iteration, &entry.spec.name, &outcome);

            match outcome.disposition {
                Disposition::Continue => {}
                Disposition::Skipped(_) => skipped.push(entry.spec.name.clone()),
                Disposition::Abort(kind) => {
                    return Ok(IterationOutcome::Aborted {
                        step: entry.spec.name.clone(),
                        kind,
                    });
                }
            }
        }

        Ok(IterationOutcome::Completed { skipped })
    }

    /// Build the input for the step at `index`.
    ///
    /// The outer result carries ledger failures; the inner one a missing
    /// required dependency.
    fn resolve_input(
        &self,
        ledger: &dyn Ledger,
        run_id: &str,
        unit: &WorkUnit,
        iteration: u32,
        index: usize,
    ) -> Result<std::result::Result<Value, StepError>> {
        let spec = &self.steps[index].spec;
        let mut inputs = Map::new();

        for dep in &spec.dependencies {
            match self.resolve_dependency(ledger, run_id, iteration, index, dep)? {
                Some(payload) => {
                    inputs.insert(dep.step.clone(), payload);
                }
                None if dep.required => {
                    return Ok(Err(StepError::new(
                        ErrorKind::MissingDependency,
                        format!(
                            "step '{}' requires '{}' but it has no OK result",
                            spec.name, dep.step
                        ),
                    )));
                }
                None => {
                    inputs.insert(dep.step.clone(), Value::Null);
                }
            }
        }

        Ok(Ok(json!({
            "work_unit": unit.to_input(),
            "iteration": iteration,
            "inputs": inputs,
        })))
    }

    fn resolve_dependency(
        &self,
        ledger: &dyn Ledger,
        run_id: &str,
        iteration: u32,
        index: usize,
        dep: &Dependency,
    ) -> Result<Option<Value>> {
        match dep.source {
            DependencySource::CurrentIteration => match ledger.read(run_id, iteration, &dep.step) {
                Ok(entry) if entry.is_ok() => Ok(Some(entry.payload)),
                Ok(_) | Err(RatchetError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            },
            DependencySource::LatestOk => {
                // Steps that already ran this iteration may be read at it;
                // anything else only up to the previous iteration.
                let runs_earlier = self.position(&dep.step).is_some_and(|pos| pos < index);
                let bound = if runs_earlier { Some(iteration) } else { iteration.checked_sub(1) };
                match bound {
                    Some(max) => Ok(ledger.latest_through(run_id, &dep.step, max)?.map(|e| e.payload)),
                    None => Ok(None),
                }
            }
        }
    }

    /// Whether the escalation step asked to stop at `iteration`.
    pub fn escalation_requested(&self, ledger: &dyn Ledger, run_id: &str, iteration: u32) -> Result<bool> {
        let Some(step) = &self.escalation_step else {
            return Ok(false);
        };
        match ledger.read(run_id, iteration, step) {
            Ok(entry) if entry.is_ok() => Ok(entry.payload.get(ESCALATE_FIELD).and_then(Value::as_bool) == Some(true)),
            Ok(_) | Err(RatchetError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn emit_step_finished(events: &dyn EventSink, run_id: &str, iteration: u32, step: &str, outcome: &StepOutcome) {
    let event = EventRecord::step_finished(
        run_id,
        iteration,
        step,
        outcome.entry.status.as_str(),
        outcome.attempts,
        outcome.latency.as_millis() as u64,
    );
    if let Err(e) = events.emit(&event) {
        log::warn!("Failed to record step event for {}: {}", run_id, e);
    }
}
