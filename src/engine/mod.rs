//! Deployment execution.
//!
//! The [`Deployment`] driver loads the checkpoint under the stack lock,
//! plans against it, and hands the plan to the [`StepScheduler`]. Finished
//! steps flow through a single [`CheckpointWriter`] so that the persisted
//! state only ever records completed work.

mod checkpoint;
mod deployment;
mod outputs;
mod scheduler;

pub use checkpoint::{CheckpointWriter, FinishRecord};
pub use deployment::{
    Deployment, DeploymentBuilder, DeploymentOptions, DeploymentResult, StepResult,
};
pub use outputs::OutputTable;
pub use scheduler::{
    CancellationHandle, DEFAULT_PARALLELISM, DeploymentStatus, ScheduleReport, StepRecord,
    StepScheduler,
};
