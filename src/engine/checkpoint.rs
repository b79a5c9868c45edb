//! Single writer for the checkpoint of a running deployment.
//!
//! Step completions are folded into one in-memory checkpoint and saved after
//! every change, so the persisted state never contains a resource whose step
//! has not finished.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, StrataError};
use crate::planner::{Step, StepOp};
use crate::provider::StepOutcome;
use crate::resource::ResourceState;
use crate::state::{Checkpoint, DeploymentHistoryEntry, DeploymentOperation, StateStore};

/// How a deployment ended, as recorded in the history.
#[derive(Debug, Clone)]
pub struct FinishRecord {
    /// Kind of deployment.
    pub operation: DeploymentOperation,
    /// Hash of the deployed program.
    pub program_hash: String,
    /// Identifier of the deployment run.
    pub deployment_id: Uuid,
    /// URNs the deployment changed.
    pub changed: Vec<String>,
    /// First error, if the deployment did not succeed.
    pub error: Option<String>,
}

/// Serializes checkpoint mutations and persists each one.
pub struct CheckpointWriter {
    store: Arc<dyn StateStore>,
    checkpoint: Mutex<Checkpoint>,
}

impl CheckpointWriter {
    /// Creates a writer starting from `checkpoint`.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, checkpoint: Checkpoint) -> Self {
        Self {
            store,
            checkpoint: Mutex::new(checkpoint),
        }
    }

    /// Records that a step is about to call its provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be saved.
    pub async fn begin(&self, step: &Step) -> Result<()> {
        if step.op == StepOp::Same {
            return Ok(());
        }
        let mut checkpoint = self.checkpoint.lock().await;
        checkpoint.add_pending(&step.urn, &step.op.to_string());
        self.store.save(&checkpoint).await
    }

    /// Folds a finished step into the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the step is malformed or the checkpoint cannot be
    /// saved.
    pub async fn record_done(&self, step: &Step, outcome: &StepOutcome) -> Result<()> {
        let mut checkpoint = self.checkpoint.lock().await;

        match step.op {
            StepOp::Create | StepOp::Same | StepOp::Read => {
                let state = Self::new_state(step, outcome)?;
                checkpoint.upsert(state);
            }
            StepOp::Update => {
                let state = Self::new_state(step, outcome)?;
                // A settled update that replaced the resource keeps the old
                // entry for deletion by a later run.
                if outcome.superseded {
                    checkpoint.mark_replaced(&step.urn);
                }
                checkpoint.upsert(state);
            }
            StepOp::Replace => {
                let state = Self::new_state(step, outcome)?;
                // Create-before-delete keeps the old entry until its delete step.
                if checkpoint.get(&step.urn).is_some() {
                    checkpoint.mark_replaced(&step.urn);
                }
                checkpoint.upsert(state);
            }
            StepOp::Delete => {
                checkpoint.remove(&step.urn);
            }
            StepOp::DeleteReplaced => {
                let id = step.old.as_ref().and_then(|o| o.id.as_deref());
                if checkpoint.remove_replaced(&step.urn, id).is_none()
                    && checkpoint.get(&step.urn).is_some_and(|live| live.id.as_deref() == id)
                {
                    // Delete-before-replace removes the live entry up front.
                    checkpoint.remove(&step.urn);
                }
            }
        }

        if step.op != StepOp::Same {
            checkpoint.clear_pending(&step.urn, &step.op.to_string());
        }
        debug!(urn = %step.urn, op = %step.op, "Checkpointed step");
        self.store.save(&checkpoint).await
    }

    /// Clears the in-flight record of a failed step.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be saved.
    pub async fn record_failed(&self, step: &Step) -> Result<()> {
        if step.op == StepOp::Same {
            return Ok(());
        }
        let mut checkpoint = self.checkpoint.lock().await;
        checkpoint.clear_pending(&step.urn, &step.op.to_string());
        self.store.save(&checkpoint).await
    }

    /// Stamps the manifest, appends a history entry, and saves a final time.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be saved.
    pub async fn finish(&self, record: FinishRecord) -> Result<Checkpoint> {
        let mut checkpoint = self.checkpoint.lock().await;

        checkpoint.manifest.time = chrono::Utc::now();
        checkpoint.manifest.engine_version = env!("CARGO_PKG_VERSION").to_string();
        checkpoint.manifest.program_hash.clone_from(&record.program_hash);
        checkpoint.manifest.deployment_id = Some(record.deployment_id.to_string());

        let entry = match &record.error {
            None => DeploymentHistoryEntry::new(record.operation, &record.program_hash, record.changed),
            Some(error) => DeploymentHistoryEntry::failed(
                record.operation,
                &record.program_hash,
                record.changed,
                error,
            ),
        };
        checkpoint.add_history(entry);

        self.store.save(&checkpoint).await?;
        Ok(checkpoint.clone())
    }

    /// A copy of the current checkpoint.
    pub async fn snapshot(&self) -> Checkpoint {
        self.checkpoint.lock().await.clone()
    }

    fn new_state(step: &Step, outcome: &StepOutcome) -> Result<ResourceState> {
        let desired = step.new.as_ref().ok_or_else(|| {
            StrataError::internal(format!("{} step for {} has no desired state", step.op, step.urn))
        })?;
        Ok(ResourceState::from_desired(
            desired,
            outcome.id.clone(),
            outcome.inputs.clone(),
            outcome.outputs.clone(),
            step.old.as_ref().filter(|_| step.op != StepOp::Replace),
        ))
    }
}
