//! Steps: the unit of work in a deployment plan.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::resource::{DesiredResource, ResourceState, Urn};

/// Operation a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOp {
    /// Create a resource that does not exist yet.
    Create,
    /// Change a resource in place.
    Update,
    /// Create the replacement half of a replace.
    Replace,
    /// Delete a resource no longer declared.
    Delete,
    /// Delete the old half of a replace.
    DeleteReplaced,
    /// No change; prior outputs are reused.
    Same,
    /// Adopt an existing physical resource.
    Read,
}

/// Lifecycle of a step during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting on dependencies.
    Pending,
    /// Every dependency is done; waiting for a worker.
    Ready,
    /// Provider work in progress.
    Running,
    /// Finished and checkpointed.
    Done,
    /// Provider work failed.
    Failed,
    /// Never run because a dependency failed or the deployment stopped.
    Skipped,
}

/// Settles a step whose inputs were not fully known when it was planned.
///
/// The step is planned as an update; once its inputs are resolved it is
/// diffed again and becomes a no-op, an update, or a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recheck {
    /// Replacing the resource is permitted if the resolved inputs demand it.
    pub allow_replace: bool,
}

/// A single step in a deployment plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Position in the plan; also a topological rank.
    pub index: usize,
    /// Operation.
    pub op: StepOp,
    /// Resource the step acts on.
    pub urn: Urn,
    /// Type token of the resource.
    pub type_token: String,
    /// Recorded state, for every operation except create and read.
    pub old: Option<ResourceState>,
    /// Desired resource, for every operation except the deletes.
    pub new: Option<DesiredResource>,
    /// Indices of steps that must be done first.
    pub dependencies: Vec<usize>,
    /// Human readable reason.
    pub reason: String,
    /// Input keys that changed.
    pub changed_keys: Vec<String>,
    /// Set when the step is diffed again at dispatch.
    pub recheck: Option<Recheck>,
}

impl Step {
    /// Creates a step with no dependencies.
    #[must_use]
    pub fn new(
        op: StepOp,
        urn: Urn,
        type_token: impl Into<String>,
        old: Option<ResourceState>,
        new: Option<DesiredResource>,
    ) -> Self {
        Self {
            index: 0,
            op,
            urn,
            type_token: type_token.into(),
            old,
            new,
            dependencies: Vec::new(),
            reason: String::new(),
            changed_keys: Vec::new(),
            recheck: None,
        }
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Whether a provider manages the resource.
    #[must_use]
    pub fn is_custom(&self) -> bool {
        self.new
            .as_ref()
            .map(|r| r.custom)
            .or_else(|| self.old.as_ref().map(|r| r.custom))
            .unwrap_or(true)
    }

    /// Returns true for operations that remove a physical resource.
    #[must_use]
    pub const fn is_delete(&self) -> bool {
        self.op.is_delete()
    }

    /// Human-readable description of the step.
    #[must_use]
    pub fn description(&self) -> String {
        let name = self.urn.name();
        match self.op {
            StepOp::Create => format!("Create {} '{name}'", self.type_token),
            StepOp::Update => format!("Update {} '{name}'", self.type_token),
            StepOp::Replace => format!("Create replacement {} '{name}'", self.type_token),
            StepOp::Delete => format!("Delete {} '{name}'", self.type_token),
            StepOp::DeleteReplaced => format!("Delete replaced {} '{name}'", self.type_token),
            StepOp::Same => format!("No change for {} '{name}'", self.type_token),
            StepOp::Read => format!("Import {} '{name}'", self.type_token),
        }
    }
}

impl StepOp {
    /// Returns true for operations that remove a physical resource.
    #[must_use]
    pub const fn is_delete(self) -> bool {
        matches!(self, Self::Delete | Self::DeleteReplaced)
    }

    /// Returns true for operations that change anything.
    #[must_use]
    pub const fn is_change(self) -> bool {
        !matches!(self, Self::Same)
    }

    /// Short symbol used in plan listings.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "+-",
            Self::Delete => "-",
            Self::DeleteReplaced => "--",
            Self::Same => " ",
            Self::Read => "=",
        }
    }
}

impl StepStatus {
    /// Returns true once the step can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for StepOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::DeleteReplaced => "delete-replaced",
            Self::Same => "same",
            Self::Read => "read",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}
