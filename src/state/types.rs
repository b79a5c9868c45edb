//! Checkpoint types persisted by state stores.
//!
//! The checkpoint is the last known deployed state of a stack. Its layout is
//! versioned; newer fields are always optional so older checkpoints keep
//! loading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::StateError;
use crate::resource::{ResourceState, Urn};

/// Current version of the checkpoint format.
pub const CHECKPOINT_VERSION: u32 = 3;

/// Maximum number of history entries kept.
const MAX_HISTORY: usize = 100;

/// The complete deployment state of a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint format version.
    pub version: u32,
    /// Stack name.
    pub stack: String,
    /// Project name.
    pub project: String,
    /// Metadata about the deployment that wrote this checkpoint.
    #[serde(default)]
    pub manifest: Manifest,
    /// Resources, each listed after the resources it depends on.
    #[serde(default)]
    pub resources: Vec<ResourceState>,
    /// Provider operations started but not yet confirmed.
    #[serde(default)]
    pub pending_operations: Vec<PendingOperation>,
    /// Deployment history (recent entries).
    #[serde(default)]
    pub history: Vec<DeploymentHistoryEntry>,
}

/// Metadata about the deployment that produced a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Engine version that wrote the checkpoint.
    pub engine_version: String,
    /// When the checkpoint was written.
    pub time: DateTime<Utc>,
    /// Hash of the program that was deployed.
    #[serde(default)]
    pub program_hash: String,
    /// Identifier of the deployment run.
    #[serde(default)]
    pub deployment_id: Option<String>,
}

/// A provider operation in flight when the checkpoint was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Resource the operation targets.
    pub urn: Urn,
    /// Operation name (create, update, delete, ...).
    pub operation: String,
    /// When the operation started.
    pub started_at: DateTime<Utc>,
}

/// A single entry in the deployment history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentHistoryEntry {
    /// When the deployment finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: DeploymentOperation,
    /// Program hash at time of deployment.
    pub program_hash: String,
    /// Resources changed by the deployment.
    pub resources: Vec<String>,
    /// Whether the deployment succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of deployment operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOperation {
    /// Converge the stack to the program.
    Update,
    /// Delete every resource.
    Destroy,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            time: Utc::now(),
            program_hash: String::new(),
            deployment_id: None,
        }
    }
}

impl Checkpoint {
    /// Creates a new empty checkpoint.
    #[must_use]
    pub fn new(stack: &str, project: &str) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            stack: stack.to_string(),
            project: project.to_string(),
            manifest: Manifest::default(),
            resources: Vec::new(),
            pending_operations: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Checks that a loaded checkpoint is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint was written by a newer engine or
    /// lists a resource twice.
    pub fn validate(&self) -> Result<(), StateError> {
        if self.version > CHECKPOINT_VERSION {
            return Err(StateError::VersionMismatch {
                supported: CHECKPOINT_VERSION,
                found: self.version,
            });
        }

        let mut live = BTreeSet::new();
        let mut replaced = BTreeSet::new();
        for resource in &self.resources {
            let fresh = if resource.pending_replacement {
                replaced.insert((&resource.urn, resource.id.as_deref()))
            } else {
                live.insert(&resource.urn)
            };
            if !fresh {
                return Err(StateError::corrupted(format!(
                    "resource {} is listed more than once",
                    resource.urn
                )));
            }
        }

        Ok(())
    }

    /// Gets the live entry for a resource.
    #[must_use]
    pub fn get(&self, urn: &Urn) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| &r.urn == urn && !r.pending_replacement)
    }

    /// Gets the old entry of a resource that was replaced but not yet deleted.
    #[must_use]
    pub fn get_replaced(&self, urn: &Urn) -> Option<&ResourceState> {
        self.resources
            .iter()
            .find(|r| &r.urn == urn && r.pending_replacement)
    }

    /// Live resources, in checkpoint order.
    pub fn live_resources(&self) -> impl Iterator<Item = &ResourceState> {
        self.resources.iter().filter(|r| !r.pending_replacement)
    }

    /// Old halves of replacements that have not been deleted yet.
    pub fn replaced_resources(&self) -> impl Iterator<Item = &ResourceState> {
        self.resources.iter().filter(|r| r.pending_replacement)
    }

    /// Number of resource entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if no resources are recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Adds or replaces the live entry for a resource.
    pub fn upsert(&mut self, state: ResourceState) {
        match self
            .resources
            .iter()
            .position(|r| r.urn == state.urn && !r.pending_replacement)
        {
            Some(pos) => self.resources[pos] = state,
            None => self.resources.push(state),
        }
        self.reorder();
    }

    /// Marks the live entry of a resource as replaced, keeping it for deletion.
    pub fn mark_replaced(&mut self, urn: &Urn) {
        if let Some(entry) = self
            .resources
            .iter_mut()
            .find(|r| &r.urn == urn && !r.pending_replacement)
        {
            entry.pending_replacement = true;
        }
    }

    /// Removes the live entry for a resource.
    pub fn remove(&mut self, urn: &Urn) -> Option<ResourceState> {
        let pos = self
            .resources
            .iter()
            .position(|r| &r.urn == urn && !r.pending_replacement)?;
        Some(self.resources.remove(pos))
    }

    /// Removes a replaced entry, identified by URN and physical ID since an
    /// interrupted deployment can leave more than one behind.
    pub fn remove_replaced(&mut self, urn: &Urn, id: Option<&str>) -> Option<ResourceState> {
        let pos = self
            .resources
            .iter()
            .position(|r| &r.urn == urn && r.pending_replacement && r.id.as_deref() == id)?;
        Some(self.resources.remove(pos))
    }

    /// Records an operation as in flight.
    pub fn add_pending(&mut self, urn: &Urn, operation: &str) {
        self.pending_operations.push(PendingOperation {
            urn: urn.clone(),
            operation: operation.to_string(),
            started_at: Utc::now(),
        });
    }

    /// Clears the in-flight record of an operation.
    pub fn clear_pending(&mut self, urn: &Urn, operation: &str) {
        self.pending_operations
            .retain(|p| !(&p.urn == urn && p.operation == operation));
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: DeploymentHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Stable re-sort so every entry follows the entries it depends on.
    fn reorder(&mut self) {
        let position: HashMap<&Urn, usize> = self
            .resources
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.pending_replacement)
            .map(|(i, r)| (&r.urn, i))
            .collect();

        let n = self.resources.len();
        let mut remaining = vec![0usize; n];
        let mut dependents = vec![Vec::new(); n];
        for (i, resource) in self.resources.iter().enumerate() {
            for dep in &resource.dependencies {
                if let Some(&d) = position.get(dep)
                    && d != i
                {
                    remaining[i] += 1;
                    dependents[d].push(i);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &d in &dependents[next] {
                remaining[d] -= 1;
                if remaining[d] == 0 {
                    ready.insert(d);
                }
            }
        }

        // Leftovers only happen with a corrupt cyclic state; keep them in place.
        if order.len() < n {
            let placed: BTreeSet<usize> = order.iter().copied().collect();
            order.extend((0..n).filter(|i| !placed.contains(i)));
        }

        if order.iter().enumerate().all(|(i, &o)| i == o) {
            return;
        }

        let mut slots: Vec<Option<ResourceState>> =
            std::mem::take(&mut self.resources).into_iter().map(Some).collect();
        self.resources = order.into_iter().filter_map(|i| slots[i].take()).collect();
    }
}

impl DeploymentHistoryEntry {
    /// Creates a new history entry.
    #[must_use]
    pub fn new(operation: DeploymentOperation, program_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            program_hash: program_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: DeploymentOperation,
        program_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::new(operation, program_hash, resources)
        }
    }
}

impl std::fmt::Display for DeploymentOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Update => "update",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::PropertyMap;

    fn state(name: &str, deps: &[&str]) -> ResourceState {
        let now = Utc::now();
        ResourceState {
            urn: urn(name),
            type_token: "test:index:Thing".into(),
            custom: true,
            id: Some(format!("{name}-id")),
            inputs: PropertyMap::new(),
            outputs: PropertyMap::new(),
            dependencies: deps.iter().map(|d| urn(d)).collect(),
            parent: None,
            protect: false,
            delete_before_replace: false,
            retain_on_delete: false,
            pending_replacement: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn urn(name: &str) -> Urn {
        Urn::new("dev", "test", None, "test:index:Thing", name)
    }

    fn names(checkpoint: &Checkpoint) -> Vec<&str> {
        checkpoint.resources.iter().map(|r| r.urn.name()).collect()
    }

    #[test]
    fn test_upsert_keeps_dependency_order() {
        let mut cp = Checkpoint::new("dev", "test");
        cp.upsert(state("a", &[]));
        cp.upsert(state("b", &[]));
        // a now depends on b, so it must move after b.
        cp.upsert(state("a", &["b"]));
        assert_eq!(names(&cp), vec!["b", "a"]);
        assert_eq!(cp.len(), 2);
    }

    #[test]
    fn test_replacement_entries() {
        let mut cp = Checkpoint::new("dev", "test");
        cp.upsert(state("a", &[]));
        cp.mark_replaced(&urn("a"));
        let mut fresh = state("a", &[]);
        fresh.id = Some("a-new".into());
        cp.upsert(fresh);

        assert_eq!(cp.len(), 2);
        assert_eq!(cp.get(&urn("a")).unwrap().id.as_deref(), Some("a-new"));
        assert_eq!(cp.get_replaced(&urn("a")).unwrap().id.as_deref(), Some("a-id"));
        assert!(cp.validate().is_ok());

        cp.remove_replaced(&urn("a"), Some("a-id"));
        assert_eq!(cp.len(), 1);
        assert!(cp.get_replaced(&urn("a")).is_none());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_newer_versions() {
        let mut cp = Checkpoint::new("dev", "test");
        cp.resources.push(state("a", &[]));
        cp.resources.push(state("a", &[]));
        assert!(matches!(cp.validate(), Err(StateError::Corrupted { .. })));

        let mut cp = Checkpoint::new("dev", "test");
        cp.version = CHECKPOINT_VERSION + 1;
        assert!(matches!(cp.validate(), Err(StateError::VersionMismatch { .. })));
    }

    #[test]
    fn test_old_checkpoint_without_optional_fields_loads() {
        let json = r#"{
            "version": 1,
            "stack": "dev",
            "project": "test",
            "resources": [{
                "urn": "urn:strata:dev::test::test:index:Thing::a",
                "type": "test:index:Thing",
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z"
            }]
        }"#;
        let cp: Checkpoint = serde_json::from_str(json).unwrap();
        assert!(cp.validate().is_ok());
        let a = cp.get(&urn("a")).unwrap();
        assert!(a.custom);
        assert!(a.id.is_none());
        assert!(cp.pending_operations.is_empty());
    }

    #[test]
    fn test_pending_operations() {
        let mut cp = Checkpoint::new("dev", "test");
        cp.add_pending(&urn("a"), "create");
        cp.add_pending(&urn("b"), "delete");
        cp.clear_pending(&urn("a"), "create");
        assert_eq!(cp.pending_operations.len(), 1);
        assert_eq!(cp.pending_operations[0].urn, urn("b"));
    }
}
