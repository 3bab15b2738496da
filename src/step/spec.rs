//! Static step definitions.

use std::time::Duration;

use crate::schema::Schema;

/// What happens when a step ends in ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Fail the run and stop the iteration
    #[default]
    AbortRun,
    /// Record the error and continue with the next step
    Skip,
    /// Re-invoke up to n more times, then behave like `AbortRun`
    Retry(u32),
}

impl FailurePolicy {
    /// Additional invocations allowed after the first.
    pub fn retries(&self) -> u32 {
        match self {
            FailurePolicy::Retry(n) => *n,
            FailurePolicy::AbortRun | FailurePolicy::Skip => 0,
        }
    }

    /// Whether a final ERROR lets the pipeline proceed.
    pub fn continues_on_error(&self) -> bool {
        matches!(self, FailurePolicy::Skip)
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::AbortRun => write!(f, "ABORT_RUN"),
            FailurePolicy::Skip => write!(f, "SKIP"),
            FailurePolicy::Retry(n) => write!(f, "RETRY({})", n),
        }
    }
}

/// Which ledger entry a dependency reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencySource {
    /// The entry an earlier step committed in this iteration
    CurrentIteration,
    /// The most recent OK entry the step may observe
    LatestOk,
}

/// An upstream entry a step's input is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub step: String,
    pub source: DependencySource,
    /// Absent required inputs fail the step with MISSING_DEPENDENCY;
    /// absent optional ones resolve to `null`
    pub required: bool,
}

impl Dependency {
    /// Required dependency on an earlier step's output from this iteration.
    pub fn current(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            source: DependencySource::CurrentIteration,
            required: true,
        }
    }

    /// Required dependency on a step's most recent OK output.
    pub fn latest(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            source: DependencySource::LatestOk,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// One pipeline stage: name, schemas, failure policy and inputs.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub name: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
    pub policy: FailurePolicy,
    pub dependencies: Vec<Dependency>,
    /// Per-invocation limit; the executor default applies when unset
    pub timeout: Option<Duration>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_schema: Schema::any(),
            output_schema: Schema::any(),
            policy: FailurePolicy::default(),
            dependencies: Vec::new(),
            timeout: None,
        }
    }

    pub fn input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn depends_on(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_retries() {
        assert_eq!(FailurePolicy::AbortRun.retries(), 0);
        assert_eq!(FailurePolicy::Retry(3).retries(), 3);
        assert!(FailurePolicy::Skip.continues_on_error());
        assert!(!FailurePolicy::Retry(2).continues_on_error());
        assert_eq!(FailurePolicy::Retry(2).to_string(), "RETRY(2)");
    }

    #[test]
    fn test_spec_builder() {
        let spec = StepSpec::new("evaluate")
            .policy(FailurePolicy::Skip)
            .depends_on(Dependency::current("produce"))
            .depends_on(Dependency::latest("__gate__").optional())
            .timeout(Duration::from_secs(5));

        assert_eq!(spec.name, "evaluate");
        assert_eq!(spec.dependencies.len(), 2);
        assert!(spec.dependencies[0].required);
        assert!(!spec.dependencies[1].required);
        assert_eq!(spec.dependencies[1].source, DependencySource::LatestOk);
        assert_eq!(spec.timeout, Some(Duration::from_secs(5)));
    }
}
