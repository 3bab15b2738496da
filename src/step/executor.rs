//! Step Executor
//!
//! Runs one step for one iteration: validates the input, invokes the
//! collaborator under a timeout, validates the output, applies the failure
//! policy and commits exactly one ledger entry with the final result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use super::collaborator::{ArtifactScope, Step, StepContext};
use super::spec::StepSpec;
use crate::artifact::{ArtifactRef, ArtifactStore};
use crate::domain::{ErrorKind, StepError};
use crate::error::Result;
use crate::id::run_namespace;
use crate::ledger::{Ledger, LedgerEntry, StepResult};

/// Executor tunables.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Timeout for steps that do not set their own
    pub default_timeout: Duration,
    /// First retry delay; doubles on every further retry
    pub retry_base: Duration,
    /// Upper bound on a single retry delay
    pub retry_max: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(300),
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
        }
    }
}

impl ExecutorConfig {
    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.retry_base.saturating_mul(factor).min(self.retry_max)
    }
}

/// How the committed entry is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write-once; a divergent repeat is a conflict
    Record,
    /// Replace the entry; used when an iteration is explicitly re-run
    Overwrite,
}

/// What the pipeline should do after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The step is OK
    Continue,
    /// The step is ERROR under a SKIP policy
    Skipped(ErrorKind),
    /// The step is ERROR and the run must fail
    Abort(ErrorKind),
}

/// Result of executing one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub entry: LedgerEntry,
    /// Collaborator invocations made (0 for locally detected failures)
    pub attempts: u32,
    pub latency: Duration,
    pub disposition: Disposition,
}

/// Executes steps against a shared ledger and artifact store.
pub struct StepExecutor {
    artifacts: Arc<dyn ArtifactStore>,
    ledger: Arc<dyn Ledger>,
    config: ExecutorConfig,
}

impl StepExecutor {
    pub fn new(artifacts: Arc<dyn ArtifactStore>, ledger: Arc<dyn Ledger>, config: ExecutorConfig) -> Self {
        Self {
            artifacts,
            ledger,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute a step with an already resolved input.
    ///
    /// Only ledger and store failures are returned as errors; every step
    /// failure is committed as an ERROR entry and reflected in the outcome.
    pub async fn execute(
        &self,
        spec: &StepSpec,
        step: &dyn Step,
        run_id: &str,
        iteration: u32,
        input: Value,
        mode: WriteMode,
    ) -> Result<StepOutcome> {
        let started = Instant::now();

        if let Err(violations) = spec.input_schema.validate(&input) {
            let error = StepError::new(
                ErrorKind::SchemaInvalid,
                format!("input rejected: {}", violations.join("; ")),
            );
            return self.fail_locally(spec, run_id, iteration, error, mode);
        }

        let timeout = spec.timeout.unwrap_or(self.config.default_timeout);
        let max_attempts = 1 + spec.policy.retries();
        let mut ctx = StepContext {
            run_id: run_id.to_string(),
            iteration,
            step: spec.name.clone(),
            attempt: 0,
            input,
            artifacts: ArtifactScope::new(self.artifacts.clone(), run_id),
        };

        let mut attempt = 0;
        let failure = loop {
            attempt += 1;
            ctx.attempt = attempt;
            debug!(run_id, iteration, step = %spec.name, attempt, "invoking step");

            match self.attempt(spec, step, &ctx, timeout).await? {
                Ok(output) => {
                    let entry = self.commit(run_id, iteration, &spec.name, StepResult::ok(output), mode)?;
                    let latency = started.elapsed();
                    info!(
                        run_id,
                        iteration,
                        step = %spec.name,
                        attempts = attempt,
                        latency_ms = latency.as_millis() as u64,
                        "step ok"
                    );
                    return Ok(StepOutcome {
                        entry,
                        attempts: attempt,
                        latency,
                        disposition: Disposition::Continue,
                    });
                }
                Err(error) => {
                    if !error.kind.is_retryable() || attempt >= max_attempts {
                        break error;
                    }
                    let delay = self.config.backoff(attempt - 1);
                    warn!(
                        run_id,
                        iteration,
                        step = %spec.name,
                        attempt,
                        kind = %error.kind,
                        delay_ms = delay.as_millis() as u64,
                        "step attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        let error = failure.with_attempts(attempt);
        let kind = error.kind;
        let entry = self.commit(run_id, iteration, &spec.name, StepResult::error(&error)?, mode)?;
        let latency = started.elapsed();
        let disposition = Self::disposition(spec, kind);
        warn!(
            run_id,
            iteration,
            step = %spec.name,
            attempts = attempt,
            kind = %kind,
            policy = %spec.policy,
            latency_ms = latency.as_millis() as u64,
            "step failed: {}",
            error.message
        );
        Ok(StepOutcome {
            entry,
            attempts: attempt,
            latency,
            disposition,
        })
    }

    /// Commit a failure detected before the collaborator was invoked
    /// (bad input, missing dependency). Never retried.
    pub fn fail_locally(
        &self,
        spec: &StepSpec,
        run_id: &str,
        iteration: u32,
        error: StepError,
        mode: WriteMode,
    ) -> Result<StepOutcome> {
        let kind = error.kind;
        let entry = self.commit(run_id, iteration, &spec.name, StepResult::error(&error)?, mode)?;
        warn!(run_id, iteration, step = %spec.name, kind = %kind, "step failed before invocation: {}", error.message);
        Ok(StepOutcome {
            entry,
            attempts: 0,
            latency: Duration::ZERO,
            disposition: Self::disposition(spec, kind),
        })
    }

    /// One collaborator invocation. The outer result carries store failures,
    /// the inner one the step's own failure.
    async fn attempt(
        &self,
        spec: &StepSpec,
        step: &dyn Step,
        ctx: &StepContext,
        timeout: Duration,
    ) -> Result<std::result::Result<Value, StepError>> {
        let output = match tokio::time::timeout(timeout, step.invoke(ctx)).await {
            Err(_) => {
                return Ok(Err(StepError::new(
                    ErrorKind::Timeout,
                    format!("no result within {}ms", timeout.as_millis()),
                )));
            }
            Ok(Err(failure)) => return Ok(Err(failure.into())),
            Ok(Ok(output)) => output,
        };

        match spec.output_schema.validate(&output) {
            Ok(()) => Ok(Ok(output)),
            Err(violations) => {
                let raw = self.persist_raw_output(spec, ctx, &output)?;
                Ok(Err(StepError::new(
                    ErrorKind::SchemaInvalid,
                    format!("output rejected: {}", violations.join("; ")),
                )
                .with_raw_output(raw)))
            }
        }
    }

    fn persist_raw_output(&self, spec: &StepSpec, ctx: &StepContext, output: &Value) -> Result<ArtifactRef> {
        let name = raw_output_name(&spec.name, ctx.iteration);
        let content = serde_json::to_vec_pretty(output)?;
        let meta = self.artifacts.put(&run_namespace(&ctx.run_id), &name, &content)?;
        Ok(meta.to_ref())
    }

    fn commit(&self, run_id: &str, iteration: u32, step: &str, result: StepResult, mode: WriteMode) -> Result<LedgerEntry> {
        match mode {
            WriteMode::Record => self.ledger.record(run_id, iteration, step, result),
            WriteMode::Overwrite => self.ledger.overwrite(run_id, iteration, step, result),
        }
    }

    fn disposition(spec: &StepSpec, kind: ErrorKind) -> Disposition {
        if spec.policy.continues_on_error() {
            Disposition::Skipped(kind)
        } else {
            Disposition::Abort(kind)
        }
    }
}

/// Artifact name holding a step's schema-invalid raw output.
pub fn raw_output_name(step: &str, iteration: u32) -> String {
    format!("__raw/{}/{}.json", step, iteration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{MemoryArtifactStore, Revision};
    use crate::domain::StepFailure;
    use crate::ledger::{EntryStatus, MemoryLedger};
    use crate::schema::Schema;
    use crate::step::FailurePolicy;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` invocations, then returns `output`.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        output: Value,
    }

    impl Flaky {
        fn new(failures: u32, output: Value) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                output,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Step for Flaky {
        async fn invoke(&self, _ctx: &StepContext) -> std::result::Result<Value, StepFailure> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(StepFailure::collaborator(format!("failure {}", n)))
            } else {
                Ok(self.output.clone())
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl Step for Slow {
        async fn invoke(&self, _ctx: &StepContext) -> std::result::Result<Value, StepFailure> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!({}))
        }
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            default_timeout: Duration::from_secs(5),
            retry_base: Duration::from_millis(1),
            retry_max: Duration::from_millis(4),
        }
    }

    fn setup() -> (StepExecutor, Arc<MemoryLedger>, Arc<MemoryArtifactStore>) {
        let ledger = Arc::new(MemoryLedger::new());
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let executor = StepExecutor::new(artifacts.clone(), ledger.clone(), fast_config());
        (executor, ledger, artifacts)
    }

    fn object_schema(required: &str) -> Schema {
        Schema::compile(json!({"type": "object", "required": [required]})).unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ExecutorConfig {
            default_timeout: Duration::from_secs(1),
            retry_base: Duration::from_millis(100),
            retry_max: Duration::from_millis(350),
        };
        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(2), Duration::from_millis(350));
        assert_eq!(config.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_success_records_ok_entry() {
        let (executor, ledger, _) = setup();
        let step = Flaky::new(0, json!({"result": 1}));
        let spec = StepSpec::new("produce").output_schema(object_schema("result"));

        let outcome = executor
            .execute(&spec, &step, "run-1", 0, json!({}), WriteMode::Record)
            .await
            .unwrap();
        assert_eq!(outcome.disposition, Disposition::Continue);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(ledger.read("run-1", 0, "produce").unwrap().payload, json!({"result": 1}));
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_collaborator() {
        let (executor, ledger, _) = setup();
        let step = Flaky::new(0, json!({}));
        let spec = StepSpec::new("produce")
            .input_schema(object_schema("ticket"))
            .policy(FailurePolicy::Retry(3));

        let outcome = executor
            .execute(&spec, &step, "run-1", 0, json!({"other": 1}), WriteMode::Record)
            .await
            .unwrap();
        assert_eq!(step.calls(), 0);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.disposition, Disposition::Abort(ErrorKind::SchemaInvalid));
        let entry = ledger.read("run-1", 0, "produce").unwrap();
        assert_eq!(entry.status, EntryStatus::Error);
        assert_eq!(entry.error().unwrap().kind, ErrorKind::SchemaInvalid);
    }

    #[tokio::test]
    async fn test_invalid_output_persists_raw_artifact() {
        let (executor, ledger, artifacts) = setup();
        let step = Flaky::new(0, json!({"unexpected": true}));
        let spec = StepSpec::new("evaluate")
            .output_schema(object_schema("metrics"))
            .policy(FailurePolicy::Skip);

        let outcome = executor
            .execute(&spec, &step, "run-1", 2, json!({}), WriteMode::Record)
            .await
            .unwrap();
        assert_eq!(outcome.disposition, Disposition::Skipped(ErrorKind::SchemaInvalid));

        let error = ledger.read("run-1", 2, "evaluate").unwrap().error().unwrap();
        let raw = error.raw_output.unwrap();
        assert_eq!(raw.name, "__raw/evaluate/2.json");
        let stored = artifacts.get("runs/run-1", &raw.name, Revision::At(raw.revision)).unwrap();
        let parsed: Value = serde_json::from_slice(&stored.content).unwrap();
        assert_eq!(parsed, json!({"unexpected": true}));
    }

    #[tokio::test]
    async fn test_retry_then_success_records_single_entry() {
        let (executor, ledger, _) = setup();
        let step = Flaky::new(2, json!({"ok": true}));
        let spec = StepSpec::new("produce").policy(FailurePolicy::Retry(2));

        let outcome = executor
            .execute(&spec, &step, "run-1", 0, json!({}), WriteMode::Record)
            .await
            .unwrap();
        assert_eq!(step.calls(), 3);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.disposition, Disposition::Continue);
        assert_eq!(ledger.history("run-1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausted_aborts() {
        let (executor, ledger, _) = setup();
        let step = Flaky::new(10, json!({}));
        let spec = StepSpec::new("produce").policy(FailurePolicy::Retry(2));

        let outcome = executor
            .execute(&spec, &step, "run-1", 0, json!({}), WriteMode::Record)
            .await
            .unwrap();
        assert_eq!(step.calls(), 3);
        assert_eq!(outcome.disposition, Disposition::Abort(ErrorKind::CollaboratorError));
        assert_eq!(ledger.read("run-1", 0, "produce").unwrap().error().unwrap().attempts, 3);
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let (executor, ledger, _) = setup();
        let spec = StepSpec::new("produce").timeout(Duration::from_millis(20));

        let outcome = executor
            .execute(&spec, &Slow, "run-1", 0, json!({}), WriteMode::Record)
            .await
            .unwrap();
        assert_eq!(outcome.disposition, Disposition::Abort(ErrorKind::Timeout));
        assert_eq!(ledger.read("run-1", 0, "produce").unwrap().error().unwrap().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_overwrite_mode_replaces_divergent_entry() {
        let (executor, ledger, _) = setup();
        let spec = StepSpec::new("produce");
        executor
            .execute(&spec, &Flaky::new(0, json!(1)), "run-1", 0, json!({}), WriteMode::Record)
            .await
            .unwrap();

        let conflict = executor
            .execute(&spec, &Flaky::new(0, json!(2)), "run-1", 0, json!({}), WriteMode::Record)
            .await;
        assert!(conflict.is_err());

        executor
            .execute(&spec, &Flaky::new(0, json!(2)), "run-1", 0, json!({}), WriteMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(ledger.read("run-1", 0, "produce").unwrap().payload, json!(2));
    }
}
