//! Loop Controller
//!
//! Dequeues work units, drives one run per unit through repeated pipeline
//! passes, and moves each run to exactly one terminal status. Iterations
//! within a run are strictly sequential; distinct units may be driven by
//! independent workers sharing the same stores.

pub mod cancel;
pub mod queue;
pub mod stores;
pub mod transition;

pub use cancel::{CancelHandle, CancelToken};
pub use queue::WorkQueue;
pub use stores::{StorePaths, Stores};
pub use transition::{ControllerState, Transition, decide};

use std::sync::Arc;

use serde::Serialize;

use crate::artifact::Revision;
use crate::domain::{EventRecord, FailureReason, Run, RunStatus, WorkUnit};
use crate::error::{RatchetError, Result};
use crate::gate::{EvaluationGate, GateVerdict};
use crate::id::run_namespace;
use crate::pipeline::{IterationOutcome, Pipeline};
use crate::step::{ExecutorConfig, StepExecutor, WriteMode};

use cancel::CancelRegistry;

/// Artifact under the run namespace holding the work unit, so a run can be
/// resumed without the original queue.
pub const WORK_UNIT_ARTIFACT: &str = "work_unit.json";

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Circuit breaker on iterations per run; treated as at least 1
    pub max_iterations: u32,
    /// Concurrent workers for [`LoopController::run_pool`]
    pub workers: usize,
    pub executor: ExecutorConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            workers: 1,
            executor: ExecutorConfig::default(),
        }
    }
}

/// Result of driving one work unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub work_unit_key: String,
    pub status: RunStatus,
    /// Pipeline passes started, including a cancelled or aborted one
    pub iterations: u32,
    pub failure: Option<FailureReason>,
    /// Verdict of the last gated iteration
    pub last_verdict: Option<GateVerdict>,
}

impl RunSummary {
    fn new(run: &Run, last_verdict: Option<GateVerdict>) -> Self {
        Self {
            run_id: run.id.clone(),
            work_unit_key: run.work_unit_key.clone(),
            status: run.status,
            iterations: run.iteration + 1,
            failure: run.failure.clone(),
            last_verdict,
        }
    }
}

pub struct LoopController {
    pipeline: Pipeline,
    gate: EvaluationGate,
    stores: Stores,
    executor: StepExecutor,
    config: ControllerConfig,
    queue: WorkQueue,
    cancels: Arc<CancelRegistry>,
}

impl std::fmt::Debug for LoopController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopController")
            .field("pipeline", &self.pipeline)
            .field("config", &self.config)
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl LoopController {
    pub fn new(pipeline: Pipeline, gate: EvaluationGate, stores: Stores, config: ControllerConfig) -> Self {
        let executor = StepExecutor::new(stores.artifacts.clone(), stores.ledger.clone(), config.executor.clone());
        Self {
            pipeline,
            gate,
            stores,
            executor,
            config,
            queue: WorkQueue::new(),
            cancels: Arc::new(CancelRegistry::default()),
        }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Queue a work unit. A cancel left over from an earlier run of the same
    /// key is cleared.
    pub fn enqueue(&self, unit: WorkUnit) {
        log::debug!("Enqueued work unit {}", unit.key());
        self.cancels.release(unit.key());
        self.queue.push(unit);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.cancels.clone())
    }

    /// Drain the queue on the current task.
    pub async fn run(&self) -> Vec<RunSummary> {
        let summaries = self.work(0).await;
        self.emit(&EventRecord::controller_done(summaries.len()));
        summaries
    }

    /// Drain the queue with the configured number of workers.
    pub async fn run_pool(self: &Arc<Self>) -> Vec<RunSummary> {
        self.run_workers(self.config.workers).await
    }

    /// Drain the queue with `workers` concurrent tasks. Each work unit, and
    /// so each run, is owned by exactly one task.
    pub async fn run_workers(self: &Arc<Self>, workers: usize) -> Vec<RunSummary> {
        let handles: Vec<_> = (0..workers.max(1))
            .map(|worker| {
                let controller = Arc::clone(self);
                tokio::spawn(async move { controller.work(worker).await })
            })
            .collect();

        let mut summaries = Vec::new();
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(mut done) => summaries.append(&mut done),
                Err(e) => log::error!("Worker task failed: {}", e),
            }
        }
        self.emit(&EventRecord::controller_done(summaries.len()));
        summaries
    }

    async fn work(&self, worker: usize) -> Vec<RunSummary> {
        let mut summaries = Vec::new();
        let mut state = ControllerState::PendingWork;
        loop {
            state = match state {
                ControllerState::PendingWork => match self.queue.pop() {
                    Some(unit) => ControllerState::Iterating(unit),
                    None => ControllerState::Done,
                },
                ControllerState::Iterating(unit) => {
                    let key = unit.key().to_string();
                    match self.process(unit).await {
                        Ok(summary) => summaries.push(summary),
                        Err(e) => log::error!("Worker {} failed work unit {}: {}", worker, key, e),
                    }
                    ControllerState::PendingWork
                }
                ControllerState::Done => break,
            };
        }
        log::debug!("Worker {} done after {} runs", worker, summaries.len());
        summaries
    }

    /// Start a run for `unit` and drive it to a terminal status.
    ///
    /// Step failures end up in the run status. Store errors are returned
    /// after the run has been marked FAILED where that was still possible.
    pub async fn process(&self, unit: WorkUnit) -> Result<RunSummary> {
        let mut run = Run::start(unit.key());
        self.stores.runs.create(&run)?;
        tracing::info!(run_id = %run.id, work_unit = unit.key(), "run started");
        self.emit(&EventRecord::run_started(&run.id, unit.key()));

        let result = match self.save_work_unit(&run, &unit) {
            Ok(()) => self.drive(&mut run, &unit, WriteMode::Record).await,
            Err(e) => Err(e),
        };
        self.cancels.release(unit.key());
        self.conclude(run, result)
    }

    /// Re-drive an ACTIVE run from its recorded iteration. Entries already
    /// recorded for that iteration are replaced.
    pub async fn resume(&self, run_id: &str) -> Result<RunSummary> {
        let mut run = self.stores.runs.get(run_id)?;
        if run.status.is_terminal() {
            return Err(RatchetError::InvalidState(format!(
                "run {} is already {}",
                run.id, run.status
            )));
        }
        let stored = self
            .stores
            .artifacts
            .get(&run_namespace(&run.id), WORK_UNIT_ARTIFACT, Revision::Latest)?;
        let unit: WorkUnit = serde_json::from_slice(&stored.content)?;

        tracing::info!(run_id = %run.id, iteration = run.iteration, "run resumed");
        self.emit(&EventRecord::run_resumed(&run.id, run.iteration));

        let result = self.drive(&mut run, &unit, WriteMode::Overwrite).await;
        self.cancels.release(unit.key());
        self.conclude(run, result)
    }

    /// Purge the artifact namespace of a finished run. Returns the number of
    /// revisions removed.
    pub fn collect_garbage(&self, run_id: &str) -> Result<usize> {
        collect_garbage(&self.stores, run_id)
    }

    fn save_work_unit(&self, run: &Run, unit: &WorkUnit) -> Result<()> {
        let content = serde_json::to_vec(unit)?;
        self.stores
            .artifacts
            .put(&run_namespace(&run.id), WORK_UNIT_ARTIFACT, &content)?;
        Ok(())
    }

    async fn drive(&self, run: &mut Run, unit: &WorkUnit, first_mode: WriteMode) -> Result<Option<GateVerdict>> {
        let cancel = self.cancels.token(unit.key());
        let ledger = self.stores.ledger.as_ref();
        let max_iterations = self.config.max_iterations.max(1);
        let mut mode = first_mode;
        let mut last_verdict = None;

        loop {
            let iteration = run.iteration;
            tracing::debug!(run_id = %run.id, iteration, "iteration started");
            self.emit(&EventRecord::iteration_started(&run.id, iteration));

            let outcome = self
                .pipeline
                .run_iteration(
                    &self.executor,
                    ledger,
                    self.stores.events.as_ref(),
                    &run.id,
                    unit,
                    iteration,
                    mode,
                    &cancel,
                )
                .await?;

            match outcome {
                IterationOutcome::Completed { skipped } => {
                    if !skipped.is_empty() {
                        log::info!("Run {} iteration {} skipped: {}", run.id, iteration, skipped.join(", "));
                    }
                }
                IterationOutcome::Aborted { step, kind } => {
                    tracing::warn!(run_id = %run.id, iteration, step = %step, kind = %kind, "run aborted");
                    run.fail(FailureReason::StepAborted { step, kind })?;
                    break;
                }
                IterationOutcome::Cancelled { before_step } => {
                    tracing::info!(run_id = %run.id, iteration, before_step = %before_step, "run cancelled");
                    run.fail(FailureReason::Cancelled)?;
                    break;
                }
            }

            let verdict = self
                .gate
                .judge(ledger, &run.id, self.pipeline.evaluation_step(), iteration, mode)?;
            let escalate = self.pipeline.escalation_requested(ledger, &run.id, iteration)?;
            self.emit(&EventRecord::iteration_complete(&run.id, iteration, verdict.overall_pass));

            let transition = decide(verdict.overall_pass, escalate, iteration, max_iterations);
            last_verdict = Some(verdict);
            mode = WriteMode::Record;

            match transition.terminal_status() {
                Some(status) => {
                    run.finish(status)?;
                    break;
                }
                None => {
                    run.advance()?;
                    self.stores.runs.update(run)?;
                }
            }
        }

        self.stores.runs.update(run)?;
        Ok(last_verdict)
    }

    fn conclude(&self, mut run: Run, result: Result<Option<GateVerdict>>) -> Result<RunSummary> {
        let last_verdict = match result {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::error!(run_id = %run.id, error = %e, "run stopped by store error");
                if !run.status.is_terminal() && run.fail(FailureReason::Internal { message: e.to_string() }).is_ok() {
                    if let Err(update) = self.stores.runs.update(&run) {
                        log::warn!("Failed to mark run {} failed: {}", run.id, update);
                    }
                    self.emit(&EventRecord::run_finished(&run.id, run.status.as_str(), run.iteration + 1));
                }
                return Err(e);
            }
        };

        tracing::info!(
            run_id = %run.id,
            status = run.status.as_str(),
            iterations = run.iteration + 1,
            "run finished"
        );
        self.emit(&EventRecord::run_finished(&run.id, run.status.as_str(), run.iteration + 1));
        Ok(RunSummary::new(&run, last_verdict))
    }

    fn emit(&self, event: &EventRecord) {
        if let Err(e) = self.stores.events.emit(event) {
            log::warn!("Failed to record {} event: {}", event.event_type, e);
        }
    }
}

/// Purge the artifact namespace of a finished run; refused while it is ACTIVE.
pub fn collect_garbage(stores: &Stores, run_id: &str) -> Result<usize> {
    let run = stores.runs.get(run_id)?;
    if !run.status.is_terminal() {
        return Err(RatchetError::InvalidState(format!(
            "run {} is still {}",
            run.id, run.status
        )));
    }
    let removed = stores.artifacts.purge_namespace(&run_namespace(&run.id))?;
    log::info!("Purged {} artifact revisions of run {}", removed, run.id);
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, Metric, StepFailure, event_types};
    use crate::events::MemoryEventLog;
    use crate::ledger::{GATE_STEP, Ledger, MemoryLedger, StepResult};
    use crate::runs::{MemoryRunStore, RunStore};
    use crate::step::{FailurePolicy, Step, StepContext, StepSpec};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Reports one quality value per iteration, repeating the last one.
    struct ScriptedEvaluator {
        values: Vec<f64>,
    }

    #[async_trait]
    impl Step for ScriptedEvaluator {
        async fn invoke(&self, ctx: &StepContext) -> std::result::Result<Value, StepFailure> {
            let index = (ctx.iteration as usize).min(self.values.len() - 1);
            let metric = Metric::new("quality", self.values[index], 0.8);
            Ok(json!({ "metrics": [metric] }))
        }
    }

    struct Produce {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Step for Produce {
        async fn invoke(&self, ctx: &StepContext) -> std::result::Result<Value, StepFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let draft = ctx
                .artifacts
                .put("draft.md", format!("draft {}", ctx.iteration).as_bytes())
                .map_err(|e| StepFailure::collaborator(e.to_string()))?;
            Ok(json!({ "draft": draft }))
        }
    }

    /// Escalates from a given iteration on.
    struct EscalateFrom(u32);

    #[async_trait]
    impl Step for EscalateFrom {
        async fn invoke(&self, ctx: &StepContext) -> std::result::Result<Value, StepFailure> {
            Ok(json!({ "escalate": ctx.iteration >= self.0 }))
        }
    }

    struct Failing;

    #[async_trait]
    impl Step for Failing {
        async fn invoke(&self, _ctx: &StepContext) -> std::result::Result<Value, StepFailure> {
            Err(StepFailure::collaborator("boom"))
        }
    }

    fn pipeline(values: Vec<f64>, calls: Arc<AtomicU32>) -> Pipeline {
        Pipeline::builder()
            .step(StepSpec::new("produce"), Produce { calls })
            .step(StepSpec::new("evaluate"), ScriptedEvaluator { values })
            .evaluation_step("evaluate")
            .build()
            .unwrap()
    }

    fn controller(pipeline: Pipeline, max_iterations: u32) -> (LoopController, Arc<MemoryEventLog>) {
        let events = Arc::new(MemoryEventLog::new());
        let stores = Stores {
            events: events.clone(),
            ..Stores::in_memory()
        };
        let config = ControllerConfig {
            max_iterations,
            ..ControllerConfig::default()
        };
        (
            LoopController::new(pipeline, EvaluationGate::new(["quality"]), stores, config),
            events,
        )
    }

    #[tokio::test]
    async fn test_completes_when_gate_passes() {
        let calls = Arc::new(AtomicU32::new(0));
        let (controller, events) = controller(pipeline(vec![0.9], calls.clone()), 10);
        let summary = controller.process(WorkUnit::keyed("W1")).await.unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.iterations, 1);
        assert!(summary.last_verdict.unwrap().overall_pass);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.of_type(event_types::RUN_FINISHED, Some(&summary.run_id)).len(), 1);
    }

    #[tokio::test]
    async fn test_exhausts_at_cap() {
        let calls = Arc::new(AtomicU32::new(0));
        let (controller, _) = controller(pipeline(vec![0.1], calls.clone()), 3);
        let summary = controller.process(WorkUnit::keyed("W1")).await.unwrap();

        assert_eq!(summary.status, RunStatus::Exhausted);
        assert_eq!(summary.iterations, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let ledger = controller.stores().ledger.clone();
        assert!(ledger.read(&summary.run_id, 3, "produce").is_err());
    }

    #[tokio::test]
    async fn test_escalation_stops_run() {
        let calls = Arc::new(AtomicU32::new(0));
        let pipeline = Pipeline::builder()
            .step(StepSpec::new("produce"), Produce { calls })
            .step(StepSpec::new("evaluate"), ScriptedEvaluator { values: vec![0.1] })
            .step(StepSpec::new("review"), EscalateFrom(2))
            .evaluation_step("evaluate")
            .escalation_step("review")
            .build()
            .unwrap();
        let (controller, _) = controller(pipeline, 10_000);
        let summary = controller.process(WorkUnit::keyed("W1")).await.unwrap();

        assert_eq!(summary.status, RunStatus::Escalated);
        assert_eq!(summary.iterations, 3);
    }

    #[tokio::test]
    async fn test_pass_wins_over_escalation() {
        let pipeline = Pipeline::builder()
            .step(StepSpec::new("evaluate"), ScriptedEvaluator { values: vec![0.9] })
            .step(StepSpec::new("review"), EscalateFrom(0))
            .evaluation_step("evaluate")
            .escalation_step("review")
            .build()
            .unwrap();
        let (controller, _) = controller(pipeline, 10);
        let summary = controller.process(WorkUnit::keyed("W1")).await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_abort_fails_run_and_continues_queue() {
        let pipeline = Pipeline::builder()
            .step(StepSpec::new("produce").policy(FailurePolicy::AbortRun), Failing)
            .step(StepSpec::new("evaluate"), ScriptedEvaluator { values: vec![0.9] })
            .evaluation_step("evaluate")
            .build()
            .unwrap();
        let (controller, events) = controller(pipeline, 10);
        controller.enqueue(WorkUnit::keyed("W1"));
        controller.enqueue(WorkUnit::keyed("W2"));

        let summaries = controller.run().await;
        assert_eq!(summaries.len(), 2);
        for summary in &summaries {
            assert_eq!(summary.status, RunStatus::Failed);
            assert_eq!(
                summary.failure,
                Some(FailureReason::StepAborted {
                    step: "produce".to_string(),
                    kind: ErrorKind::CollaboratorError
                })
            );
        }
        assert_eq!(controller.pending(), 0);
        assert_eq!(events.of_type(event_types::CONTROLLER_DONE, None).len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let calls = Arc::new(AtomicU32::new(0));
        let (controller, _) = controller(pipeline(vec![0.1], calls.clone()), 10);
        controller.cancel_handle().cancel("W1");

        let summary = controller.process(WorkUnit::keyed("W1")).await.unwrap();
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.failure, Some(FailureReason::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_finish_does_not_stick() {
        let calls = Arc::new(AtomicU32::new(0));
        let (controller, _) = controller(pipeline(vec![0.9], calls.clone()), 10);
        controller.enqueue(WorkUnit::keyed("W1"));
        assert_eq!(controller.run().await[0].status, RunStatus::Completed);

        controller.cancel_handle().cancel("W1");
        controller.enqueue(WorkUnit::keyed("W1"));
        let summaries = controller.run().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, RunStatus::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_workers_share_queue() {
        let calls = Arc::new(AtomicU32::new(0));
        let (controller, _) = controller(pipeline(vec![0.5, 0.9], calls.clone()), 10);
        let controller = Arc::new(controller);
        for i in 0..6 {
            controller.enqueue(WorkUnit::keyed(format!("W{}", i)));
        }

        let summaries = controller.run_workers(3).await;
        assert_eq!(summaries.len(), 6);
        assert!(summaries.iter().all(|s| s.status == RunStatus::Completed && s.iterations == 2));
        assert_eq!(calls.load(Ordering::SeqCst), 12);
        assert_eq!(controller.stores().runs.list().unwrap().len(), 6);
    }

    /// Tracks how many invocations are in flight at once.
    struct Slow {
        in_flight: Arc<AtomicU32>,
        peak: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Step for Slow {
        async fn invoke(&self, _ctx: &StepContext) -> std::result::Result<Value, StepFailure> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({ "metrics": [Metric::new("quality", 0.9, 0.8)] }))
        }
    }

    async fn peak_concurrency(workers: usize) -> (usize, u32) {
        let peak = Arc::new(AtomicU32::new(0));
        let pipeline = Pipeline::builder()
            .step(
                StepSpec::new("evaluate"),
                Slow {
                    in_flight: Arc::new(AtomicU32::new(0)),
                    peak: peak.clone(),
                },
            )
            .evaluation_step("evaluate")
            .build()
            .unwrap();
        let engine = crate::config::EngineConfig {
            workers,
            ..crate::config::EngineConfig::default()
        };
        let controller = Arc::new(LoopController::new(
            pipeline,
            EvaluationGate::new(["quality"]),
            Stores::in_memory(),
            engine.to_controller_config(),
        ));
        for i in 0..6 {
            controller.enqueue(WorkUnit::keyed(format!("W{}", i)));
        }
        let summaries = controller.run_pool().await;
        (summaries.len(), peak.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_pool_size_comes_from_config() {
        let (done, peak) = peak_concurrency(1).await;
        assert_eq!(done, 6);
        assert_eq!(peak, 1);

        let (done, peak) = peak_concurrency(3).await;
        assert_eq!(done, 6);
        assert!(peak > 1 && peak <= 3, "peak {}", peak);
    }

    #[tokio::test]
    async fn test_resume_active_run() {
        let calls = Arc::new(AtomicU32::new(0));
        let (controller, _) = controller(pipeline(vec![0.9], calls), 10);
        let stores = controller.stores().clone();

        // A run left ACTIVE at iteration 1 with a stale partial entry
        let mut run = Run::start("W1");
        run.advance().unwrap();
        stores.runs.create(&run).unwrap();
        stores
            .artifacts
            .put(
                &run_namespace(&run.id),
                WORK_UNIT_ARTIFACT,
                &serde_json::to_vec(&WorkUnit::keyed("W1")).unwrap(),
            )
            .unwrap();
        stores
            .ledger
            .record(&run.id, 1, "produce", StepResult::ok(json!({"stale": true})))
            .unwrap();

        let summary = controller.resume(&run.id).await.unwrap();
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.iterations, 2);
        let produced = stores.ledger.read(&run.id, 1, "produce").unwrap();
        assert!(produced.payload.get("stale").is_none());
        assert!(stores.ledger.read(&run.id, 1, GATE_STEP).unwrap().is_ok());

        assert!(matches!(
            controller.resume(&run.id).await.unwrap_err(),
            RatchetError::InvalidState(_)
        ));
    }

    #[tokio::test]
    async fn test_garbage_collection_requires_terminal_run() {
        let calls = Arc::new(AtomicU32::new(0));
        let (controller, _) = controller(pipeline(vec![0.9], calls), 10);
        let summary = controller.process(WorkUnit::keyed("W1")).await.unwrap();

        // work unit plus one draft
        assert_eq!(controller.collect_garbage(&summary.run_id).unwrap(), 2);
        let namespace = run_namespace(&summary.run_id);
        assert!(controller.stores().artifacts.list(&namespace).unwrap().is_empty());

        let active = Run::start("W2");
        controller.stores().runs.create(&active).unwrap();
        assert!(controller.collect_garbage(&active.id).is_err());
    }

    /// Ledger that rejects every write.
    struct BrokenLedger(MemoryLedger);

    impl Ledger for BrokenLedger {
        fn record(&self, run_id: &str, iteration: u32, step: &str, _result: StepResult) -> Result<crate::ledger::LedgerEntry> {
            Err(RatchetError::Storage(format!("disk full at {}/{}/{}", run_id, iteration, step)))
        }
        fn overwrite(&self, run_id: &str, iteration: u32, step: &str, result: StepResult) -> Result<crate::ledger::LedgerEntry> {
            self.record(run_id, iteration, step, result)
        }
        fn read(&self, run_id: &str, iteration: u32, step: &str) -> Result<crate::ledger::LedgerEntry> {
            self.0.read(run_id, iteration, step)
        }
        fn find_latest_ok(
            &self,
            run_id: &str,
            step: &str,
            max_iteration: Option<u32>,
        ) -> Result<Option<crate::ledger::LedgerEntry>> {
            self.0.find_latest_ok(run_id, step, max_iteration)
        }
        fn history(&self, run_id: &str) -> Result<Vec<crate::ledger::LedgerEntry>> {
            self.0.history(run_id)
        }
    }

    #[tokio::test]
    async fn test_store_error_marks_run_failed() {
        let calls = Arc::new(AtomicU32::new(0));
        let runs = Arc::new(MemoryRunStore::new());
        let stores = Stores {
            ledger: Arc::new(BrokenLedger(MemoryLedger::new())),
            runs: runs.clone(),
            ..Stores::in_memory()
        };
        let controller = LoopController::new(
            pipeline(vec![0.9], calls),
            EvaluationGate::new(["quality"]),
            stores,
            ControllerConfig::default(),
        );

        let err = controller.process(WorkUnit::keyed("W1")).await.unwrap_err();
        assert!(err.is_integrity());
        let run = &runs.list().unwrap()[0];
        assert_eq!(run.status, RunStatus::Failed);
        assert!(matches!(run.failure, Some(FailureReason::Internal { .. })));
    }
}
