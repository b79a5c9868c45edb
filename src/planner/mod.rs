//! Planning module for deployment operations.
//!
//! This module compares the desired resource graph with the prior checkpoint
//! and turns the differences into a DAG of executable steps.

mod diff;
mod plan;
mod step;

pub use diff::{DiffKind, DiffOptions, DiffResult, Differ, ResourceDiff};
pub use plan::{DeploymentPlan, PlanSummary};
pub use step::{Recheck, Step, StepOp, StepStatus};
