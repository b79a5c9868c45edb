//! Deployment driver: lock, load, diff, plan, execute, commit.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, StateError};
use crate::graph::ResourceGraph;
use crate::planner::{DeploymentPlan, DiffOptions, Differ, PlanSummary, StepOp, StepStatus};
use crate::provider::{ProviderGateway, ProviderRegistry, RetryPolicy, DEFAULT_STEP_TIMEOUT_SECS};
use crate::resource::Urn;
use crate::state::{Checkpoint, DeploymentOperation, StateStore, generate_holder_id};

use super::checkpoint::{CheckpointWriter, FinishRecord};
use super::scheduler::{
    CancellationHandle, DEFAULT_PARALLELISM, DeploymentStatus, ScheduleReport, StepScheduler,
};

/// Settings for a deployment run.
#[derive(Debug, Clone)]
pub struct DeploymentOptions {
    /// Maximum number of steps running at once.
    pub parallelism: usize,
    /// Timeout for a single provider call.
    pub step_timeout: Duration,
    /// Stop dispatching after this long.
    pub deployment_timeout: Option<Duration>,
    /// Retry settings for provider calls.
    pub retry: RetryPolicy,
    /// Allow deleting or replacing protected resources.
    pub allow_protected_changes: bool,
    /// Hash of the program, stored in the checkpoint manifest.
    pub program_hash: String,
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            step_timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
            deployment_timeout: None,
            retry: RetryPolicy::default(),
            allow_protected_changes: false,
            program_hash: String::new(),
        }
    }
}

/// Result of one step, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    /// Resource URN.
    pub urn: Urn,
    /// Operation.
    pub op: StepOp,
    /// Final status.
    pub status: StepStatus,
    /// Failure or skip reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// How long the step ran.
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "duration_ms::serialize")]
    pub duration: Option<Duration>,
}

/// Result of a deployment run.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    /// Identifier of the run.
    pub deployment_id: Uuid,
    /// Terminal status.
    pub status: DeploymentStatus,
    /// Planned step counts.
    #[serde(skip)]
    pub summary: PlanSummary,
    /// One entry per plan step.
    pub steps: Vec<StepResult>,
    /// Every step failure.
    pub errors: Vec<String>,
    /// Checkpoint after the run.
    #[serde(skip)]
    pub checkpoint: Checkpoint,
}

impl DeploymentResult {
    /// Returns true if every step is done.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == DeploymentStatus::Succeeded
    }

    /// Number of steps with the given status.
    #[must_use]
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }
}

impl fmt::Display for DeploymentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Deployment {} {}", self.deployment_id, self.status)?;
        write!(
            f,
            "  {} done, {} failed, {} skipped",
            self.count(StepStatus::Done),
            self.count(StepStatus::Failed),
            self.count(StepStatus::Skipped)
        )?;
        for error in &self.errors {
            write!(f, "\n  error: {error}")?;
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }
}

/// Builder for [`Deployment`].
pub struct DeploymentBuilder {
    store: Arc<dyn StateStore>,
    registry: ProviderRegistry,
    options: DeploymentOptions,
}

impl DeploymentBuilder {
    /// Sets the maximum number of running steps.
    #[must_use]
    pub const fn parallelism(mut self, parallelism: usize) -> Self {
        self.options.parallelism = parallelism;
        self
    }

    /// Sets the per-call provider timeout.
    #[must_use]
    pub const fn step_timeout(mut self, timeout: Duration) -> Self {
        self.options.step_timeout = timeout;
        self
    }

    /// Sets the whole-deployment deadline.
    #[must_use]
    pub const fn deployment_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.deployment_timeout = timeout;
        self
    }

    /// Sets the provider retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.options.retry = retry;
        self
    }

    /// Allows deleting or replacing protected resources.
    #[must_use]
    pub const fn allow_protected_changes(mut self, allow: bool) -> Self {
        self.options.allow_protected_changes = allow;
        self
    }

    /// Sets the program hash recorded in the manifest.
    #[must_use]
    pub fn program_hash(mut self, hash: impl Into<String>) -> Self {
        self.options.program_hash = hash.into();
        self
    }

    /// Replaces every option at once.
    #[must_use]
    pub fn options(mut self, options: DeploymentOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the deployment.
    #[must_use]
    pub fn build(self) -> Deployment {
        let gateway = ProviderGateway::new(self.registry)
            .with_retry(self.options.retry.clone())
            .with_step_timeout(self.options.step_timeout);
        Deployment {
            store: self.store,
            gateway: Arc::new(gateway),
            options: self.options,
            cancel: CancellationHandle::new(),
        }
    }
}

/// Drives deployments of one stack.
pub struct Deployment {
    store: Arc<dyn StateStore>,
    gateway: Arc<ProviderGateway>,
    options: DeploymentOptions,
    cancel: CancellationHandle,
}

impl Deployment {
    /// Starts building a deployment against `store` with the providers in
    /// `registry`.
    #[must_use]
    pub fn builder(store: Arc<dyn StateStore>, registry: ProviderRegistry) -> DeploymentBuilder {
        DeploymentBuilder {
            store,
            registry,
            options: DeploymentOptions::default(),
        }
    }

    /// Handle that cancels the running deployment.
    ///
    /// A request made while no run is executing stops the next run. Each
    /// run clears the request when it finishes.
    #[must_use]
    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancel.clone()
    }

    /// The deployment options.
    #[must_use]
    pub const fn options(&self) -> &DeploymentOptions {
        &self.options
    }

    /// Computes the plan for `graph` without changing anything.
    ///
    /// Providers are asked to diff but never to create, update, or delete.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded, a provider is missing,
    /// or planning fails.
    pub async fn preview(&self, graph: &ResourceGraph) -> Result<DeploymentPlan> {
        let prior = self.load_prior(graph.stack()).await?;
        self.gateway.registry().validate(graph, prior.as_ref())?;
        self.plan(graph, prior.as_ref(), false).await
    }

    /// Converges the stack to `graph`.
    ///
    /// # Errors
    ///
    /// Returns an error for configuration, state, or planning failures, all
    /// of which happen before any step runs, and for checkpoint write
    /// failures during execution. Step failures are reported in the result.
    pub async fn apply(&self, graph: &ResourceGraph) -> Result<DeploymentResult> {
        let lock = self.store.acquire_lock(&generate_holder_id()).await?;
        let result = self.apply_locked(graph).await;
        self.release(&lock.lock_id).await;
        result
    }

    /// Deletes every resource recorded for the stack.
    ///
    /// # Errors
    ///
    /// Same as [`Deployment::apply`].
    pub async fn destroy(&self) -> Result<DeploymentResult> {
        let lock = self.store.acquire_lock(&generate_holder_id()).await?;
        let result = self.destroy_locked().await;
        self.release(&lock.lock_id).await;
        result
    }

    async fn release(&self, lock_id: &str) {
        if let Err(e) = self.store.release_lock(lock_id).await {
            warn!(error = %e, "Failed to release state lock");
        }
    }

    async fn apply_locked(&self, graph: &ResourceGraph) -> Result<DeploymentResult> {
        let prior = self.load_prior(graph.stack()).await?;
        self.gateway.registry().validate(graph, prior.as_ref())?;

        let plan = self.plan(graph, prior.as_ref(), false).await?;
        let checkpoint = prior.unwrap_or_else(|| Checkpoint::new(graph.stack(), graph.project()));
        self.execute(plan, checkpoint, DeploymentOperation::Update).await
    }

    async fn destroy_locked(&self) -> Result<DeploymentResult> {
        let Some(prior) = self.store.load().await? else {
            info!("No state recorded, nothing to destroy");
            return Ok(DeploymentResult {
                deployment_id: Uuid::new_v4(),
                status: DeploymentStatus::Succeeded,
                summary: PlanSummary::default(),
                steps: Vec::new(),
                errors: Vec::new(),
                checkpoint: Checkpoint::new("", ""),
            });
        };
        Self::warn_pending(&prior);

        let graph = ResourceGraph::empty(&prior.stack, &prior.project);
        self.gateway.registry().validate(&graph, Some(&prior))?;
        let plan = self.plan(&graph, Some(&prior), true).await?;
        self.execute(plan, prior, DeploymentOperation::Destroy).await
    }

    async fn load_prior(&self, stack: &str) -> Result<Option<Checkpoint>> {
        let prior = self.store.load().await?;
        if let Some(cp) = &prior {
            if cp.stack != stack {
                return Err(StateError::StackMismatch {
                    expected: stack.to_string(),
                    found: cp.stack.clone(),
                }
                .into());
            }
            Self::warn_pending(cp);
        }
        Ok(prior)
    }

    fn warn_pending(checkpoint: &Checkpoint) {
        for op in &checkpoint.pending_operations {
            warn!(
                urn = %op.urn,
                operation = %op.operation,
                started_at = %op.started_at,
                "Previous deployment was interrupted during this operation; check the resource"
            );
        }
    }

    async fn plan(
        &self,
        graph: &ResourceGraph,
        prior: Option<&Checkpoint>,
        destroy: bool,
    ) -> Result<DeploymentPlan> {
        let options = DiffOptions {
            allow_protected_changes: self.options.allow_protected_changes,
            destroy,
        };
        let diff = Differ::new(&self.gateway, options).diff(graph, prior).await?;
        let plan = DeploymentPlan::from_diff(&diff)?;
        info!(summary = %plan.summary(), "Planned deployment");
        Ok(plan)
    }

    async fn execute(
        &self,
        plan: DeploymentPlan,
        mut checkpoint: Checkpoint,
        operation: DeploymentOperation,
    ) -> Result<DeploymentResult> {
        let deployment_id = Uuid::new_v4();
        info!(%deployment_id, %operation, steps = plan.len(), "Starting deployment");

        // Interrupted operations were reported above; this run starts clean.
        checkpoint.pending_operations.clear();

        let writer = Arc::new(CheckpointWriter::new(Arc::clone(&self.store), checkpoint));
        let report = StepScheduler::new(Arc::clone(&self.gateway), Arc::clone(&writer), &self.cancel)
            .with_parallelism(self.options.parallelism)
            .with_deadline(self.options.deployment_timeout)
            .run(&plan)
            .await;
        // A request applies to the run it stopped, not to later ones.
        self.cancel.reset();
        let report = report?;

        let status = report.status();
        let steps = Self::step_results(&plan, &report);
        let errors: Vec<String> = steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .filter_map(|s| s.error.as_ref().map(|e| format!("{}: {e}", s.urn)))
            .collect();
        let changed = steps
            .iter()
            .filter(|s| s.status == StepStatus::Done && s.op.is_change())
            .map(|s| s.urn.to_string())
            .collect();

        let error = match status {
            DeploymentStatus::Succeeded => None,
            DeploymentStatus::Failed => errors.first().cloned(),
            DeploymentStatus::Canceled if report.timed_out => Some("deployment timed out".into()),
            DeploymentStatus::Canceled => Some("deployment canceled".into()),
        };
        let checkpoint = writer
            .finish(FinishRecord {
                operation,
                program_hash: self.options.program_hash.clone(),
                deployment_id,
                changed,
                error,
            })
            .await?;

        info!(%deployment_id, %status, "Deployment finished");
        Ok(DeploymentResult {
            deployment_id,
            status,
            summary: plan.summary(),
            steps,
            errors,
            checkpoint,
        })
    }

    fn step_results(plan: &DeploymentPlan, report: &ScheduleReport) -> Vec<StepResult> {
        plan.steps
            .iter()
            .zip(&report.records)
            .map(|(step, record)| StepResult {
                urn: step.urn.clone(),
                op: step.op,
                status: record.status,
                error: record.error.clone(),
                duration: record.duration(),
            })
            .collect()
    }
}
