//! Evaluation Gate
//!
//! Turns the evaluation step's metrics vector into the authoritative
//! pass/fail verdict: the AND of every metric's `passed` flag, where every
//! expected metric must be present. The verdict is recorded in the ledger
//! under [`GATE_STEP`] so the controller reads it rather than re-deriving it.

pub mod scoring;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Metric, MetricsVector};
use crate::error::{RatchetError, Result};
use crate::ledger::{GATE_STEP, Ledger, StepResult};
use crate::step::WriteMode;

/// Verdict recorded under [`GATE_STEP`] for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub overall_pass: bool,
    /// Metrics as gated, with `passed` recomputed
    pub metrics: Vec<Metric>,
    /// Expected metric names absent from the vector
    pub missing: Vec<String>,
    /// Why the verdict failed, when it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Mean metric value
    pub score: f64,
    /// Relative change of `score` against the previous verdict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvement_rate: Option<f64>,
}

impl GateVerdict {
    fn failed(reason: impl Into<String>) -> Self {
        Self {
            overall_pass: false,
            metrics: Vec::new(),
            missing: Vec::new(),
            reason: Some(reason.into()),
            score: 0.0,
            improvement_rate: None,
        }
    }

    pub fn failing_metrics(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.iter().filter(|m| !m.passed)
    }
}

/// Gate configuration: the metric names that must be present and optional
/// thresholds that take precedence over the ones the vector carries.
#[derive(Debug, Clone, Default)]
pub struct EvaluationGate {
    expected: Vec<String>,
    thresholds: BTreeMap<String, f64>,
}

impl EvaluationGate {
    pub fn new<I, S>(expected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expected: expected.into_iter().map(Into::into).collect(),
            thresholds: BTreeMap::new(),
        }
    }

    /// Override the threshold for one metric.
    pub fn with_threshold(mut self, name: impl Into<String>, threshold: f64) -> Self {
        self.thresholds.insert(name.into(), threshold);
        self
    }

    pub fn expected(&self) -> &[String] {
        &self.expected
    }

    /// Gate a metrics vector.
    pub fn evaluate(&self, vector: &MetricsVector) -> GateVerdict {
        if let Err(e) = vector.check() {
            return GateVerdict::failed(e.to_string());
        }

        let mut metrics = vector.metrics.clone();
        for metric in &mut metrics {
            let threshold = self.thresholds.get(&metric.name).copied().unwrap_or(metric.threshold);
            metric.gate(threshold);
        }

        let missing: Vec<String> = self
            .expected
            .iter()
            .filter(|name| vector.get(name).is_none())
            .cloned()
            .collect();

        let failing: Vec<&str> = metrics.iter().filter(|m| !m.passed).map(|m| m.name.as_str()).collect();
        let reason = if metrics.is_empty() {
            Some("no metrics reported".to_string())
        } else if !missing.is_empty() {
            Some(format!("missing expected metrics: {}", missing.join(", ")))
        } else if !failing.is_empty() {
            Some(format!("below threshold: {}", failing.join(", ")))
        } else {
            None
        };

        let score = MetricsVector::new(metrics.clone()).mean();
        GateVerdict {
            overall_pass: reason.is_none(),
            metrics,
            missing,
            reason,
            score,
            improvement_rate: None,
        }
    }

    /// Gate the evaluation step's output for `iteration` and record the
    /// verdict in the ledger.
    ///
    /// An evaluation step without an OK entry, or with a malformed metrics
    /// vector, yields a failing verdict rather than an error.
    pub fn judge(
        &self,
        ledger: &dyn Ledger,
        run_id: &str,
        evaluation_step: &str,
        iteration: u32,
        mode: WriteMode,
    ) -> Result<GateVerdict> {
        let mut verdict = match ledger.read(run_id, iteration, evaluation_step) {
            Ok(entry) if entry.is_ok() => match MetricsVector::from_output(&entry.payload) {
                Ok(vector) => self.evaluate(&vector),
                Err(e) => GateVerdict::failed(e.to_string()),
            },
            Ok(entry) => GateVerdict::failed(format!(
                "evaluation step '{}' failed: {}",
                evaluation_step,
                entry.error().map(|e| e.to_string()).unwrap_or_else(|| "unknown error".to_string())
            )),
            Err(RatchetError::NotFound(_)) => {
                GateVerdict::failed(format!("evaluation step '{}' produced no result", evaluation_step))
            }
            Err(e) => return Err(e),
        };

        if let Some(prev_iteration) = iteration.checked_sub(1) {
            if let Some(previous) = ledger.latest_through(run_id, GATE_STEP, prev_iteration)? {
                let previous: GateVerdict = serde_json::from_value(previous.payload)?;
                verdict.improvement_rate = Some(scoring::improvement_rate(verdict.score, previous.score));
            }
        }

        let result = StepResult::ok(serde_json::to_value(&verdict)?);
        match mode {
            WriteMode::Record => ledger.record(run_id, iteration, GATE_STEP, result)?,
            WriteMode::Overwrite => ledger.overwrite(run_id, iteration, GATE_STEP, result)?,
        };
        tracing::info!(
            run_id,
            iteration,
            passed = verdict.overall_pass,
            score = verdict.score,
            "gate verdict{}",
            verdict.reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default()
        );
        Ok(verdict)
    }

    /// Read back a recorded verdict.
    pub fn recorded(ledger: &dyn Ledger, run_id: &str, iteration: u32) -> Result<GateVerdict> {
        let entry = ledger.read(run_id, iteration, GATE_STEP)?;
        Ok(serde_json::from_value(entry.payload)?)
    }
}
