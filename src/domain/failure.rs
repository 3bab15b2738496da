//! Typed step failures.
//!
//! A collaborator reports a [`StepFailure`]; the executor turns every failure,
//! whether reported by the collaborator or detected locally, into a
//! [`StepError`] that is recorded in the ledger.

use serde::{Deserialize, Serialize};

/// Category of a failure reported by a step collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCategory {
    /// The collaborator rejected its input
    Validation,
    /// The collaborator gave up waiting on something it depends on
    Timeout,
    /// Exception or explicit error signal
    CollaboratorError,
    /// The collaborator observed a cancellation
    Cancelled,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Validation => "VALIDATION",
            FailureCategory::Timeout => "TIMEOUT",
            FailureCategory::CollaboratorError => "COLLABORATOR_ERROR",
            FailureCategory::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure returned by a step collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub category: FailureCategory,
    pub message: String,
}

impl StepFailure {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Validation, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Timeout, message)
    }

    pub fn collaborator(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::CollaboratorError, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Cancelled, message)
    }
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

impl std::error::Error for StepFailure {}

/// Reason recorded on an ERROR ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Input or output failed schema validation
    SchemaInvalid,
    /// The collaborator failed (including VALIDATION failures it reported)
    CollaboratorError,
    /// The per-step timeout fired or the collaborator reported TIMEOUT
    Timeout,
    /// A required upstream entry was never produced OK
    MissingDependency,
    /// The collaborator observed a cancellation
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SchemaInvalid => "SCHEMA_INVALID",
            ErrorKind::CollaboratorError => "COLLABORATOR_ERROR",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::MissingDependency => "MISSING_DEPENDENCY",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }

    /// Whether another attempt of the same step could succeed.
    ///
    /// Locally detected failures (bad input, missing dependency) never reach
    /// the collaborator, so retrying cannot change them.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::SchemaInvalid | ErrorKind::CollaboratorError | ErrorKind::Timeout
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<FailureCategory> for ErrorKind {
    fn from(category: FailureCategory) -> Self {
        match category {
            FailureCategory::Validation | FailureCategory::CollaboratorError => {
                ErrorKind::CollaboratorError
            }
            FailureCategory::Timeout => ErrorKind::Timeout,
            FailureCategory::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Error detail stored as the payload of an ERROR ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
    /// Artifact holding the raw collaborator output, for SCHEMA_INVALID outputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<crate::artifact::ArtifactRef>,
    /// Number of collaborator invocations made before giving up
    #[serde(default)]
    pub attempts: u32,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw_output: None,
            attempts: 0,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_raw_output(mut self, raw: crate::artifact::ArtifactRef) -> Self {
        self.raw_output = Some(raw);
        self
    }
}

impl From<StepFailure> for StepError {
    fn from(failure: StepFailure) -> Self {
        StepError::new(failure.category.into(), failure.message)
    }
}

impl std::fmt::Display for StepError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
