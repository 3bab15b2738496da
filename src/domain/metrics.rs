//! Metrics vectors produced by the designated evaluation step.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RatchetError, Result};

/// Field of the evaluation step's output that carries the metrics.
pub const METRICS_FIELD: &str = "metrics";

/// One scored dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    /// Score in [0, 1]
    pub value: f64,
    /// Gate threshold in [0, 1]
    pub threshold: f64,
    /// `value >= threshold`, always recomputed by the core
    #[serde(default)]
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64, threshold: f64) -> Self {
        Self {
            name: name.into(),
            value,
            threshold,
            passed: value >= threshold,
            notes: None,
        }
    }

    /// Recompute `passed` against a threshold.
    pub fn gate(&mut self, threshold: f64) {
        self.threshold = threshold;
        self.passed = self.value >= threshold;
    }
}

/// Ordered set of metrics, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsVector {
    pub metrics: Vec<Metric>,
}

impl MetricsVector {
    pub fn new(metrics: Vec<Metric>) -> Self {
        Self { metrics }
    }

    /// Extract and check the metrics vector from an evaluation step output.
    ///
    /// Collaborator-supplied `passed` flags are ignored and recomputed.
    pub fn from_output(output: &Value) -> Result<Self> {
        let raw = output
            .get(METRICS_FIELD)
            .ok_or_else(|| RatchetError::SchemaInvalid(format!("output has no '{}' field", METRICS_FIELD)))?;
        let mut vector = MetricsVector {
            metrics: serde_json::from_value(raw.clone())
                .map_err(|e| RatchetError::SchemaInvalid(format!("malformed metrics: {}", e)))?,
        };
        vector.check()?;
        for metric in &mut vector.metrics {
            metric.passed = metric.value >= metric.threshold;
        }
        Ok(vector)
    }

    /// Reject out-of-range values and duplicate names.
    pub fn check(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for metric in &self.metrics {
            if !seen.insert(metric.name.as_str()) {
                return Err(RatchetError::SchemaInvalid(format!("duplicate metric: {}", metric.name)));
            }
            for (field, v) in [("value", metric.value), ("threshold", metric.threshold)] {
                if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                    return Err(RatchetError::SchemaInvalid(format!(
                        "metric '{}' {} {} outside [0, 1]",
                        metric.name, field, v
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Mean metric value, 0.0 for an empty vector.
    pub fn mean(&self) -> f64 {
        if self.metrics.is_empty() {
            return 0.0;
        }
        self.metrics.iter().map(|m| m.value).sum::<f64>() / self.metrics.len() as f64
    }
}
