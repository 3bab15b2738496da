//! Gap records: differences between the agent's result and the human reference.
//!
//! Produced by a designated step and consumed downstream as opaque input; the
//! core only offers typed access for collaborators that want it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RatchetError, Result};

/// Closed set of gap categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GapCategory {
    MissingFile,
    WrongFile,
    IncorrectTrajectory,
    BadAssumption,
    InsufficientContext,
    MissedToolOpportunity,
    SchemaMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// One actionable gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapRecord {
    pub category: GapCategory,
    pub severity: Severity,
    pub description: String,
    /// Pointer to supporting evidence (artifact name, file path, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl GapRecord {
    pub fn new(category: GapCategory, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            description: description.into(),
            evidence: None,
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }
}

/// Output of a gap-reporting step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReport {
    #[serde(default)]
    pub summary: String,
    pub gaps: Vec<GapRecord>,
    #[serde(default)]
    pub recommended_changes: Vec<String>,
}

impl GapReport {
    /// Parse a gap report out of a step output.
    pub fn parse(output: &Value) -> Result<Self> {
        serde_json::from_value(output.clone())
            .map_err(|e| RatchetError::SchemaInvalid(format!("malformed gap report: {}", e)))
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.gaps.iter().map(|g| g.severity).max()
    }

    pub fn by_category(&self, category: GapCategory) -> impl Iterator<Item = &GapRecord> {
        self.gaps.iter().filter(move |g| g.category == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_gap_report() {
        let output = json!({
            "summary": "agent missed the migration",
            "gaps": [
                {"category": "MISSING_FILE", "severity": "HIGH", "description": "no migration", "evidence": "db/001.sql"},
                {"category": "BAD_ASSUMPTION", "severity": "LOW", "description": "assumed utc"}
            ]
        });
        let report = GapReport::parse(&output).unwrap();
        assert_eq!(report.gaps.len(), 2);
        assert_eq!(report.highest_severity(), Some(Severity::High));
        assert_eq!(report.by_category(GapCategory::MissingFile).count(), 1);
        assert!(report.recommended_changes.is_empty());
    }

    #[test]
    fn test_unknown_category_rejected() {
        let output = json!({"gaps": [{"category": "TYPO", "severity": "LOW", "description": "x"}]});
        assert!(GapReport::parse(&output).is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(GapReport::default().highest_severity(), None);
    }
}
