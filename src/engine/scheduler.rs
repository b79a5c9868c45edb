//! Dependency-driven step execution with bounded parallelism.
//!
//! A single coordinator owns the in-degree table and every step status.
//! Ready steps are handed to worker tasks; completions come back through the
//! join set, are checkpointed, and only then release their dependents.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{DeployError, ProviderResult, Result, StrataError};
use crate::planner::{DeploymentPlan, Step, StepOp, StepStatus};
use crate::provider::{ProviderGateway, StepOutcome};
use crate::resource::{PropertyMap, PropertyValue};

use super::checkpoint::CheckpointWriter;
use super::outputs::OutputTable;

/// Default number of steps running at once.
pub const DEFAULT_PARALLELISM: usize = 10;

/// Terminal status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Every step is done.
    Succeeded,
    /// At least one step failed.
    Failed,
    /// Stopped before every step ran.
    Canceled,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

/// Requests a running deployment to stop dispatching steps.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationHandle {
    /// Creates a handle that is not canceled.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Requests cancellation. Running steps still finish.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Clears a request so the next run starts uncanceled.
    pub fn reset(&self) {
        self.sender.send_replace(false);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        *self.sender.borrow()
    }

    /// A receiver notified on cancellation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

/// Execution record of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    /// Final status.
    pub status: StepStatus,
    /// Failure or skip reason.
    pub error: Option<String>,
    /// Provider attempts made.
    pub attempts: u32,
    /// When every dependency was done.
    pub ready_at: Option<Instant>,
    /// When a worker picked the step up.
    pub started_at: Option<Instant>,
    /// When the step reached its final status.
    pub finished_at: Option<Instant>,
}

impl StepRecord {
    const fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            error: None,
            attempts: 0,
            ready_at: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Time between start and finish, for steps that ran.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        Some(self.finished_at?.saturating_duration_since(self.started_at?))
    }
}

/// Outcome of running a plan.
#[derive(Debug, Clone)]
pub struct ScheduleReport {
    /// One record per plan step, by index.
    pub records: Vec<StepRecord>,
    /// Every status transition in the order the coordinator saw it.
    pub trace: Vec<(usize, StepStatus)>,
    /// Dispatch stopped on request or on the deployment deadline.
    pub canceled: bool,
    /// The deployment deadline elapsed.
    pub timed_out: bool,
}

impl ScheduleReport {
    /// Terminal status: any failure wins over cancellation.
    #[must_use]
    pub fn status(&self) -> DeploymentStatus {
        if self.records.iter().any(|r| r.status == StepStatus::Failed) {
            DeploymentStatus::Failed
        } else if self.canceled || self.records.iter().any(|r| r.status != StepStatus::Done) {
            DeploymentStatus::Canceled
        } else {
            DeploymentStatus::Succeeded
        }
    }

    /// Position of a transition in the trace.
    #[must_use]
    pub fn position(&self, index: usize, status: StepStatus) -> Option<usize> {
        self.trace.iter().position(|&(i, s)| i == index && s == status)
    }
}

type WorkerOutput = (usize, Result<ProviderResult<StepOutcome>>);

/// Coordinator-owned bookkeeping for one run.
struct Run<'p> {
    steps: &'p [Step],
    records: Vec<StepRecord>,
    remaining: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    ready: VecDeque<usize>,
    outputs: OutputTable,
    trace: Vec<(usize, StepStatus)>,
    canceled: bool,
    timed_out: bool,
}

impl<'p> Run<'p> {
    fn new(steps: &'p [Step]) -> Result<Self> {
        let n = steps.len();
        let mut remaining = vec![0; n];
        let mut dependents = vec![Vec::new(); n];
        for (i, step) in steps.iter().enumerate() {
            for &d in &step.dependencies {
                if d >= n || d == i {
                    return Err(StrataError::internal(format!(
                        "step {i} has invalid dependency {d}"
                    )));
                }
                remaining[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut outputs = OutputTable::new();
        for old in steps
            .iter()
            .filter(|s| s.op == StepOp::Same)
            .filter_map(|s| s.old.as_ref())
        {
            outputs.seed(old)?;
        }

        let mut run = Self {
            steps,
            records: vec![StepRecord::pending(); n],
            remaining,
            dependents,
            ready: VecDeque::new(),
            outputs,
            trace: Vec::new(),
            canceled: false,
            timed_out: false,
        };
        for i in 0..n {
            if run.remaining[i] == 0 {
                run.transition(i, StepStatus::Ready);
                run.ready.push_back(i);
            }
        }
        Ok(run)
    }

    fn transition(&mut self, index: usize, status: StepStatus) {
        let now = Instant::now();
        let record = &mut self.records[index];
        record.status = status;
        match status {
            StepStatus::Pending => {}
            StepStatus::Ready => record.ready_at = Some(now),
            StepStatus::Running => record.started_at = Some(now),
            StepStatus::Done | StepStatus::Failed | StepStatus::Skipped => {
                record.finished_at = Some(now);
            }
        }
        self.trace.push((index, status));
    }

    /// Inputs a step runs with: recorded for unchanged resources, resolved
    /// for everything the program declares, none for deletes.
    fn inputs_for(&self, step: &Step) -> std::result::Result<PropertyMap, DeployError> {
        match (&step.old, &step.new) {
            (Some(old), _) if step.op == StepOp::Same => Ok(old.inputs.clone()),
            (_, Some(new)) if !step.is_delete() => self.outputs.resolve_inputs(&new.inputs),
            _ => Ok(PropertyMap::new()),
        }
    }

    /// True when the old half of a replacement shares its physical ID with
    /// the live resource, as providers keyed by name or path do.
    fn shares_live_id(&self, step: &Step) -> bool {
        if step.op != StepOp::DeleteReplaced {
            return false;
        }
        let Some(old_id) = step.old.as_ref().and_then(|o| o.id.as_deref()) else {
            return false;
        };
        matches!(
            self.outputs.lookup(&step.urn, None),
            Some(PropertyValue::String(live)) if live == old_id
        )
    }

    fn complete(&mut self, index: usize, attempts: u32) {
        self.records[index].attempts = attempts;
        self.transition(index, StepStatus::Done);

        for d in self.dependents[index].clone() {
            self.remaining[d] -= 1;
            if self.remaining[d] == 0 && self.records[d].status == StepStatus::Pending {
                self.transition(d, StepStatus::Ready);
                self.ready.push_back(d);
            }
        }
    }

    fn fail(&mut self, index: usize, message: String) {
        self.records[index].error = Some(message);
        self.transition(index, StepStatus::Failed);

        let steps = self.steps;
        let failed = &steps[index].urn;
        let mut stack = self.dependents[index].clone();
        while let Some(d) = stack.pop() {
            if matches!(self.records[d].status, StepStatus::Pending | StepStatus::Ready) {
                warn!(step = %steps[d], "Skipping step, dependency failed");
                self.records[d].error = Some(format!("skipped: {failed} failed"));
                self.transition(d, StepStatus::Skipped);
                stack.extend(self.dependents[d].iter().copied());
            }
        }
    }

    fn record_outputs(&mut self, step: &Step, outcome: &StepOutcome) -> Result<()> {
        if matches!(
            step.op,
            StepOp::Create | StepOp::Update | StepOp::Replace | StepOp::Read
        ) {
            self.outputs.resolve(
                &step.urn,
                outcome.id.clone(),
                outcome.inputs.clone(),
                outcome.outputs.clone(),
            )?;
        }
        Ok(())
    }

    fn settle(&mut self) {
        for i in 0..self.records.len() {
            match self.records[i].status {
                StepStatus::Running => {
                    self.records[i].error = Some("worker stopped without reporting".into());
                    self.transition(i, StepStatus::Failed);
                }
                StepStatus::Pending | StepStatus::Ready => {
                    self.transition(i, StepStatus::Skipped);
                }
                StepStatus::Done | StepStatus::Failed | StepStatus::Skipped => {}
            }
        }
    }

    fn into_report(self) -> ScheduleReport {
        ScheduleReport {
            records: self.records,
            trace: self.trace,
            canceled: self.canceled,
            timed_out: self.timed_out,
        }
    }
}

/// Runs plan steps in dependency order.
pub struct StepScheduler {
    gateway: Arc<ProviderGateway>,
    writer: Arc<CheckpointWriter>,
    parallelism: usize,
    deadline: Option<Duration>,
    cancel: watch::Receiver<bool>,
}

impl StepScheduler {
    /// Creates a scheduler with the default parallelism and no deadline.
    #[must_use]
    pub fn new(
        gateway: Arc<ProviderGateway>,
        writer: Arc<CheckpointWriter>,
        cancel: &CancellationHandle,
    ) -> Self {
        Self {
            gateway,
            writer,
            parallelism: DEFAULT_PARALLELISM,
            deadline: None,
            cancel: cancel.subscribe(),
        }
    }

    /// Sets the maximum number of running steps (at least one).
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Stops dispatching once `deadline` has elapsed.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Runs every step of `plan`.
    ///
    /// Step failures are reported in the returned records.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be written or a worker task
    /// dies. Running steps are drained first.
    pub async fn run(&self, plan: &DeploymentPlan) -> Result<ScheduleReport> {
        let mut run = Run::new(&plan.steps)?;
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut workers: JoinSet<WorkerOutput> = JoinSet::new();
        let mut cancel = self.cancel.clone();
        let mut cancel_open = true;
        let mut stopping = false;
        let mut fatal: Option<StrataError> = None;

        let has_deadline = self.deadline.is_some();
        let deadline = tokio::time::sleep(self.deadline.unwrap_or_default());
        tokio::pin!(deadline);

        info!(
            steps = plan.steps.len(),
            parallelism = self.parallelism,
            "Executing deployment plan"
        );

        loop {
            if !stopping && *cancel.borrow() {
                warn!("Deployment canceled, waiting for running steps");
                run.canceled = true;
                stopping = true;
            }
            if !stopping {
                self.dispatch(&mut run, &semaphore, &mut workers);
            }
            if workers.is_empty() {
                break;
            }

            tokio::select! {
                Some(joined) = workers.join_next() => {
                    if let Err(e) = self.handle(&mut run, joined).await {
                        error!(error = %e, "Stopping deployment");
                        fatal.get_or_insert(e);
                        stopping = true;
                    }
                }
                changed = cancel.changed(), if cancel_open && !stopping => {
                    if changed.is_err() {
                        cancel_open = false;
                    }
                }
                () = &mut deadline, if has_deadline && !stopping => {
                    warn!("Deployment deadline reached, waiting for running steps");
                    run.canceled = true;
                    run.timed_out = true;
                    stopping = true;
                }
            }
        }

        run.settle();
        if let Some(e) = fatal {
            return Err(e);
        }
        Ok(run.into_report())
    }

    fn dispatch(
        &self,
        run: &mut Run<'_>,
        semaphore: &Arc<Semaphore>,
        workers: &mut JoinSet<WorkerOutput>,
    ) {
        while let Some(&index) = run.ready.front() {
            if run.records[index].status != StepStatus::Ready {
                run.ready.pop_front();
                continue;
            }
            let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() else {
                break;
            };
            run.ready.pop_front();

            let steps = run.steps;
            let step = &steps[index];
            let inputs = match run.inputs_for(step) {
                Ok(inputs) => inputs,
                Err(e) => {
                    warn!(step = %step, error = %e, "Cannot resolve step inputs");
                    run.fail(index, e.to_string());
                    continue;
                }
            };

            let keep_physical = run.shares_live_id(step);
            run.transition(index, StepStatus::Running);
            debug!(index, step = %step, "Dispatching step");

            let gateway = Arc::clone(&self.gateway);
            let writer = Arc::clone(&self.writer);
            let step = step.clone();
            workers.spawn(async move {
                let _permit = permit;
                if let Err(e) = writer.begin(&step).await {
                    return (index, Err(e));
                }
                if keep_physical {
                    debug!(step = %step, "Replacement reuses the physical id, dropping old entry only");
                    return (index, Ok(Ok(StepOutcome::default())));
                }
                (index, Ok(gateway.execute(&step, inputs).await))
            });
        }
    }

    async fn handle(
        &self,
        run: &mut Run<'_>,
        joined: std::result::Result<WorkerOutput, JoinError>,
    ) -> Result<()> {
        let (index, result) = joined.map_err(|e| DeployError::WorkerFailed {
            message: e.to_string(),
        })?;
        let steps = run.steps;
        let step = &steps[index];

        match result {
            Err(e) => {
                run.fail(index, e.to_string());
                Err(e)
            }
            Ok(Err(e)) => {
                error!(step = %step, error = %e, "Step failed");
                run.fail(index, e.to_string());
                self.writer.record_failed(step).await
            }
            Ok(Ok(outcome)) => {
                let recorded = match run.record_outputs(step, &outcome) {
                    Ok(()) => self.writer.record_done(step, &outcome).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = recorded {
                    run.fail(index, e.to_string());
                    return Err(e);
                }
                debug!(index, step = %step, attempts = outcome.attempts, "Step done");
                run.complete(index, outcome.attempts);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, ResourceGraph};
    use crate::planner::{DiffOptions, Differ};
    use crate::resource::{PropertyValue, ResourceRegistration};
    use crate::state::{Checkpoint, MemoryStateStore, StateStore};
    use crate::testing::{FakeProvider, fake_urn, gateway_with, thing};

    fn graph(regs: Vec<ResourceRegistration>) -> ResourceGraph {
        let mut builder = GraphBuilder::new("dev", "test");
        for reg in regs {
            builder.register(reg).unwrap();
        }
        builder.finalize().unwrap()
    }

    struct Harness {
        plan: DeploymentPlan,
        scheduler: StepScheduler,
        store: Arc<MemoryStateStore>,
    }

    async fn harness(provider: FakeProvider, graph: &ResourceGraph, cancel: &CancellationHandle) -> Harness {
        let gateway = gateway_with(provider);
        let diff = Differ::new(&gateway, DiffOptions::default())
            .diff(graph, None)
            .await
            .unwrap();
        let plan = DeploymentPlan::from_diff(&diff).unwrap();
        let store = Arc::new(MemoryStateStore::new());
        let writer = Arc::new(CheckpointWriter::new(store.clone(), Checkpoint::new("dev", "test")));
        Harness {
            plan,
            scheduler: StepScheduler::new(Arc::new(gateway), writer, cancel),
            store,
        }
    }

    fn index(plan: &DeploymentPlan, name: &str) -> usize {
        plan.steps.iter().position(|s| s.urn == fake_urn(name)).unwrap()
    }

    fn chain() -> ResourceGraph {
        graph(vec![
            thing("a"),
            thing("b").with_input("a", PropertyValue::id_of(&fake_urn("a"))),
            thing("c").with_input("b", PropertyValue::output(&fake_urn("b"), "arn")),
            thing("solo"),
        ])
    }

    #[tokio::test]
    async fn test_runs_in_dependency_order() {
        let provider = FakeProvider::new();
        let h = harness(provider.clone(), &chain(), &CancellationHandle::new()).await;
        let report = h.scheduler.run(&h.plan).await.unwrap();

        assert_eq!(report.status(), DeploymentStatus::Succeeded);
        assert!(provider.position("create:a") < provider.position("create:b"));
        assert!(provider.position("create:b") < provider.position("create:c"));

        for step in &h.plan.steps {
            for &dep in &step.dependencies {
                let done = report.position(dep, StepStatus::Done).unwrap();
                let started = report.position(step.index, StepStatus::Running).unwrap();
                assert!(done < started, "step {} started before {dep} was done", step.index);
            }
        }

        let checkpoint = h.store.load().await.unwrap().unwrap();
        let b = checkpoint.get(&fake_urn("b")).unwrap();
        let c = checkpoint.get(&fake_urn("c")).unwrap();
        assert_eq!(c.inputs["b"], b.outputs["arn"]);
        assert_eq!(b.inputs["a"], PropertyValue::from(checkpoint.get(&fake_urn("a")).unwrap().id.clone().unwrap()));
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_only() {
        let provider = FakeProvider::new().failing("b");
        let h = harness(provider.clone(), &chain(), &CancellationHandle::new()).await;
        let report = h.scheduler.run(&h.plan).await.unwrap();

        let status = |name| report.records[index(&h.plan, name)].status;
        assert_eq!(report.status(), DeploymentStatus::Failed);
        assert_eq!(status("a"), StepStatus::Done);
        assert_eq!(status("b"), StepStatus::Failed);
        assert_eq!(status("c"), StepStatus::Skipped);
        assert_eq!(status("solo"), StepStatus::Done);
        assert!(!provider.events().contains(&"create:c".to_string()));

        let checkpoint = h.store.load().await.unwrap().unwrap();
        assert!(checkpoint.get(&fake_urn("a")).is_some());
        assert!(checkpoint.get(&fake_urn("b")).is_none());
        assert!(checkpoint.get(&fake_urn("c")).is_none());
        assert!(checkpoint.pending_operations.is_empty());
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let mut provider = FakeProvider::new();
        let mut regs = Vec::new();
        for i in 0..8 {
            let name = format!("r{i}");
            provider = provider.with_delay(&name, Duration::from_millis(20));
            regs.push(thing(&name));
        }
        let g = graph(regs);

        let cancel = CancellationHandle::new();
        let mut h = harness(provider.clone(), &g, &cancel).await;
        h.scheduler = h.scheduler.with_parallelism(3);
        let report = h.scheduler.run(&h.plan).await.unwrap();

        assert_eq!(report.status(), DeploymentStatus::Succeeded);
        assert!(provider.max_concurrency() <= 3);
        assert!(provider.max_concurrency() > 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start_skips_everything() {
        let cancel = CancellationHandle::new();
        cancel.cancel();
        let provider = FakeProvider::new();
        let h = harness(provider.clone(), &chain(), &cancel).await;
        let report = h.scheduler.run(&h.plan).await.unwrap();

        assert_eq!(report.status(), DeploymentStatus::Canceled);
        assert!(report.records.iter().all(|r| r.status == StepStatus::Skipped));
        assert!(provider.events().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_lets_running_steps_finish() {
        let provider = FakeProvider::new().with_delay("a", Duration::from_millis(100));
        let cancel = CancellationHandle::new();
        let h = harness(provider.clone(), &chain(), &cancel).await;
        let h = Harness {
            scheduler: h.scheduler.with_parallelism(1),
            ..h
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        let report = h.scheduler.run(&h.plan).await.unwrap();

        assert_eq!(report.status(), DeploymentStatus::Canceled);
        assert_eq!(report.records[index(&h.plan, "a")].status, StepStatus::Done);
        assert_eq!(report.records[index(&h.plan, "b")].status, StepStatus::Skipped);
        assert_eq!(report.records[index(&h.plan, "c")].status, StepStatus::Skipped);
        assert!(!provider.events().contains(&"create:b".to_string()));
    }

    #[tokio::test]
    async fn test_deadline_cancels_dispatch() {
        let provider = FakeProvider::new().with_delay("a", Duration::from_millis(100));
        let h = harness(provider, &chain(), &CancellationHandle::new()).await;
        let scheduler = h
            .scheduler
            .with_parallelism(1)
            .with_deadline(Some(Duration::from_millis(20)));
        let report = scheduler.run(&h.plan).await.unwrap();

        assert!(report.timed_out);
        assert_eq!(report.status(), DeploymentStatus::Canceled);
        assert_eq!(report.records[index(&h.plan, "c")].status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn test_step_trace_has_timestamps() {
        let h = harness(FakeProvider::new(), &chain(), &CancellationHandle::new()).await;
        let report = h.scheduler.run(&h.plan).await.unwrap();

        for record in &report.records {
            let ready = record.ready_at.unwrap();
            let started = record.started_at.unwrap();
            let finished = record.finished_at.unwrap();
            assert!(ready <= started && started <= finished);
            assert!(record.duration().is_some());
        }
    }
}
