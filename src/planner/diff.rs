//! Diff engine comparing the desired graph with the prior checkpoint.
//!
//! Resources are visited in dependency order so that each resource knows how
//! its dependencies will change. References to unchanged resources are
//! resolved from recorded outputs before comparing, and the physical ID of a
//! resource updated in place is taken from its recorded state. Any other
//! reference is not known until its target is deployed: it compares as
//! recorded, and the dependent is planned as an update that is diffed again
//! at dispatch.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::debug;

use crate::error::{PlanError, Result};
use crate::graph::ResourceGraph;
use crate::provider::{DiffChanges, ProviderGateway};
use crate::resource::{
    DesiredResource, PropertyMap, PropertyValue, ResourceState, Urn, apply_ignore_changes,
    diff_keys,
};
use crate::state::Checkpoint;

use super::step::Recheck;

/// Kind of change for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    /// Not recorded yet.
    Create,
    /// Recorded and unchanged.
    Same,
    /// Changed in place.
    Update,
    /// Must be recreated.
    Replace,
    /// Recorded but no longer declared.
    Delete,
    /// Adopted from an existing physical resource.
    Read,
}

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource URN.
    pub urn: Urn,
    /// Kind of change.
    pub kind: DiffKind,
    /// Recorded state.
    pub old: Option<ResourceState>,
    /// Desired resource.
    pub new: Option<DesiredResource>,
    /// Input keys that changed.
    pub changed_keys: Vec<String>,
    /// Keys that force a replacement.
    pub replace_keys: Vec<String>,
    /// Delete the old resource before creating its replacement.
    pub delete_before_replace: bool,
    /// Set when some inputs are not known until dependencies are deployed.
    pub recheck: Option<Recheck>,
    /// Why this kind was chosen.
    pub reason: String,
}

/// Complete diff result.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// One entry per desired or recorded resource.
    pub diffs: Vec<ResourceDiff>,
    /// Old halves of earlier replacements still awaiting deletion.
    pub leftover_replaced: Vec<ResourceState>,
}

/// Options that change how the differ treats the prior state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Allow deleting or replacing protected resources.
    pub allow_protected_changes: bool,
    /// Plan every recorded resource for deletion.
    pub destroy: bool,
}

/// Computes resource diffs.
#[derive(Debug)]
pub struct Differ<'a> {
    /// Gateway used for provider diffs.
    gateway: &'a ProviderGateway,
    /// Options.
    options: DiffOptions,
}

impl<'a> Differ<'a> {
    /// Creates a differ.
    #[must_use]
    pub const fn new(gateway: &'a ProviderGateway, options: DiffOptions) -> Self {
        Self { gateway, options }
    }

    /// Compares the graph with the prior checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if a protected resource would be deleted or replaced,
    /// or if a provider diff fails.
    pub async fn diff(&self, graph: &ResourceGraph, prior: Option<&Checkpoint>) -> Result<DiffResult> {
        let mut result = DiffResult::default();
        let mut known = KnownOutputs::default();
        let mut delete_first: BTreeSet<Urn> = BTreeSet::new();

        if !self.options.destroy {
            for desired in graph.resources() {
                let old = prior.and_then(|cp| cp.get(&desired.urn));
                let mut diff = self.diff_resource(desired, old, &known).await?;

                if diff.kind == DiffKind::Replace
                    && !diff.delete_before_replace
                    && desired.dependencies.iter().any(|d| delete_first.contains(d))
                {
                    diff.delete_before_replace = true;
                }
                if diff.kind == DiffKind::Replace && diff.delete_before_replace {
                    delete_first.insert(desired.urn.clone());
                }
                if let Some(old) = old {
                    known.record(&diff, old);
                }

                debug!(urn = %desired.urn, kind = %diff.kind, "Diffed resource");
                result.diffs.push(diff);
            }
        }

        if let Some(cp) = prior {
            for old in cp.live_resources().filter(|r| !graph.contains(&r.urn)) {
                if old.protect && !self.options.allow_protected_changes {
                    return Err(PlanError::ProtectedResource {
                        urn: old.urn.to_string(),
                        operation: String::from("deleted"),
                    }
                    .into());
                }
                result.diffs.push(ResourceDiff {
                    urn: old.urn.clone(),
                    kind: DiffKind::Delete,
                    old: Some(old.clone()),
                    new: None,
                    changed_keys: Vec::new(),
                    replace_keys: Vec::new(),
                    delete_before_replace: false,
                    recheck: None,
                    reason: if self.options.destroy {
                        String::from("destroying stack")
                    } else {
                        String::from("removed from program")
                    },
                });
            }
            result.leftover_replaced = cp.replaced_resources().cloned().collect();
        }

        Ok(result)
    }

    async fn diff_resource(
        &self,
        desired: &DesiredResource,
        old: Option<&ResourceState>,
        known: &KnownOutputs,
    ) -> Result<ResourceDiff> {
        let mut diff = ResourceDiff {
            urn: desired.urn.clone(),
            kind: DiffKind::Create,
            old: old.cloned(),
            new: Some(desired.clone()),
            changed_keys: Vec::new(),
            replace_keys: Vec::new(),
            delete_before_replace: desired.options.delete_before_replace,
            recheck: None,
            reason: String::new(),
        };

        let Some(old) = old else {
            if desired.options.import_id.is_some() {
                diff.kind = DiffKind::Read;
                diff.reason = String::from("import existing resource");
            } else {
                diff.reason = String::from("new resource");
            }
            return Ok(diff);
        };

        if old.type_token != desired.type_token {
            diff.kind = DiffKind::Replace;
            diff.reason = format!("type changed from {}", old.type_token);
            return self.check_protected(diff, old);
        }

        let mut inputs = known.resolve(&desired.inputs);
        apply_ignore_changes(&mut inputs, &old.inputs, &desired.options.ignore_changes);

        let unknown: Vec<String> = inputs
            .iter()
            .filter(|(_, v)| !v.is_resolved())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &unknown {
            match old.inputs.get(key) {
                Some(recorded) => inputs.insert(key.clone(), recorded.clone()),
                None => inputs.remove(key),
            };
        }

        let changed = diff_keys(&old.inputs, &inputs);
        if changed.is_empty() {
            if unknown.is_empty() {
                diff.kind = DiffKind::Same;
                return Ok(diff);
            }
            return Ok(self.provisional(diff, old, &unknown));
        }
        diff.changed_keys.clone_from(&changed);

        let forced: Vec<String> = changed
            .iter()
            .filter(|k| desired.options.replace_on_changes.contains(k))
            .cloned()
            .collect();
        if !forced.is_empty() {
            diff.kind = DiffKind::Replace;
            diff.reason = format!("replace on change of {}", forced.join(", "));
            diff.replace_keys = forced;
            return self.check_protected(diff, old);
        }

        if !desired.custom {
            diff.kind = DiffKind::Update;
            diff.reason = format!("changed: {}", changed.join(", "));
            return Ok(self.with_unknown(diff, old, &unknown));
        }

        match self.gateway.diff(old, &desired.type_token, &inputs).await? {
            DiffChanges::None if unknown.is_empty() => {
                diff.kind = DiffKind::Same;
                diff.changed_keys.clear();
                Ok(diff)
            }
            DiffChanges::None => {
                diff.changed_keys.clear();
                Ok(self.provisional(diff, old, &unknown))
            }
            DiffChanges::Update { keys } => {
                diff.kind = DiffKind::Update;
                diff.reason = format!("changed: {}", keys.join(", "));
                diff.changed_keys = keys;
                Ok(self.with_unknown(diff, old, &unknown))
            }
            DiffChanges::Replace { keys } => {
                diff.kind = DiffKind::Replace;
                diff.reason = format!("provider requires replacement: {}", keys.join(", "));
                diff.replace_keys = keys;
                self.check_protected(diff, old)
            }
        }
    }

    /// An update whose only possible changes are in inputs not known yet.
    fn provisional(&self, mut diff: ResourceDiff, old: &ResourceState, unknown: &[String]) -> ResourceDiff {
        diff.kind = DiffKind::Update;
        diff.reason = format!("waiting on dependency outputs: {}", unknown.join(", "));
        self.with_unknown(diff, old, unknown)
    }

    /// Marks an update for a second diff at dispatch when inputs are unknown.
    fn with_unknown(&self, mut diff: ResourceDiff, old: &ResourceState, unknown: &[String]) -> ResourceDiff {
        if unknown.is_empty() {
            return diff;
        }
        for key in unknown {
            if !diff.changed_keys.contains(key) {
                diff.changed_keys.push(key.clone());
            }
        }
        diff.recheck = Some(Recheck {
            allow_replace: !Self::is_protected(&diff, old) || self.options.allow_protected_changes,
        });
        diff
    }

    fn is_protected(diff: &ResourceDiff, old: &ResourceState) -> bool {
        old.protect || diff.new.as_ref().is_some_and(|n| n.options.protect)
    }

    fn check_protected(&self, diff: ResourceDiff, old: &ResourceState) -> Result<ResourceDiff> {
        if Self::is_protected(&diff, old) && !self.options.allow_protected_changes {
            return Err(PlanError::ProtectedResource {
                urn: diff.urn.to_string(),
                operation: String::from("replaced"),
            }
            .into());
        }
        Ok(diff)
    }
}

/// Values known before anything is deployed.
#[derive(Default)]
struct KnownOutputs {
    /// Unchanged resources: ID and outputs.
    unchanged: HashMap<Urn, ResourceState>,
    /// Resources updated in place keep their physical ID.
    stable_ids: HashMap<Urn, String>,
}

impl KnownOutputs {
    fn record(&mut self, diff: &ResourceDiff, old: &ResourceState) {
        match diff.kind {
            DiffKind::Same => {
                self.unchanged.insert(diff.urn.clone(), old.clone());
            }
            DiffKind::Update if diff.recheck.is_none() => {
                if let Some(id) = &old.id {
                    self.stable_ids.insert(diff.urn.clone(), id.clone());
                }
            }
            _ => {}
        }
    }

    fn lookup(&self, urn: &Urn, property: Option<&str>) -> Option<PropertyValue> {
        if let Some(state) = self.unchanged.get(urn) {
            return match property {
                None => state.id.clone().map(PropertyValue::String),
                Some(p) => state.output(p).cloned(),
            };
        }
        match property {
            None => self.stable_ids.get(urn).cloned().map(PropertyValue::String),
            Some(_) => None,
        }
    }

    fn resolve(&self, inputs: &PropertyMap) -> PropertyMap {
        let lookup = |urn: &Urn, property: Option<&str>| self.lookup(urn, property);
        inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.resolve_with(&lookup)))
            .collect()
    }
}

impl DiffResult {
    /// Number of diffs of a kind.
    #[must_use]
    pub fn count(&self, kind: DiffKind) -> usize {
        self.diffs.iter().filter(|d| d.kind == kind).count()
    }

    /// Returns true if anything would change.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.leftover_replaced.is_empty() || self.diffs.iter().any(|d| d.kind != DiffKind::Same)
    }

    /// Finds the diff for a resource.
    #[must_use]
    pub fn get(&self, urn: &Urn) -> Option<&ResourceDiff> {
        self.diffs.iter().find(|d| &d.urn == urn)
    }
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Same => "same",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Read => "read",
        };
        write!(f, "{s}")
    }
}
