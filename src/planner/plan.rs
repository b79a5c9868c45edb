//! Deployment plan construction.
//!
//! A plan is a DAG of [`Step`]s. Creates and updates follow the resource
//! graph; deletes run against it, so a resource is removed only after
//! everything that used it has moved on.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::{PlanError, Result};
use crate::resource::{ResourceState, Urn};

use super::diff::{DiffKind, DiffResult};
use super::step::{Step, StepOp};

/// A complete deployment plan.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Steps in a topological order of their dependencies.
    pub steps: Vec<Step>,
}

/// Per-operation step counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    /// Resources to create.
    pub creates: usize,
    /// Resources to update in place.
    pub updates: usize,
    /// Resources to replace.
    pub replaces: usize,
    /// Resources to delete.
    pub deletes: usize,
    /// Unchanged resources.
    pub sames: usize,
    /// Resources to import.
    pub reads: usize,
}

/// Working state while steps are assembled.
#[derive(Default)]
struct Assembly {
    steps: Vec<Step>,
    /// Create/update/same/read/replace step of each desired resource.
    main: HashMap<Urn, usize>,
    /// Delete steps keyed by the recorded entry they remove.
    deletes: Vec<(ResourceState, usize)>,
}

impl Assembly {
    fn push(&mut self, step: Step) -> usize {
        self.steps.push(step);
        self.steps.len() - 1
    }

    fn depend(&mut self, step: usize, on: usize) {
        if step != on && !self.steps[step].dependencies.contains(&on) {
            self.steps[step].dependencies.push(on);
        }
    }
}

impl DeploymentPlan {
    /// Builds the plan for a diff.
    ///
    /// # Errors
    ///
    /// Returns an error if the step dependencies form a cycle, which happens
    /// only for contradictory replacement orderings.
    pub fn from_diff(diff: &DiffResult) -> Result<Self> {
        let mut asm = Assembly::default();

        for d in &diff.diffs {
            let op = match d.kind {
                DiffKind::Create => StepOp::Create,
                DiffKind::Same => StepOp::Same,
                DiffKind::Update => StepOp::Update,
                DiffKind::Replace => StepOp::Replace,
                DiffKind::Read => StepOp::Read,
                DiffKind::Delete => StepOp::Delete,
            };
            let type_token = d
                .new
                .as_ref()
                .map(|n| n.type_token.clone())
                .or_else(|| d.old.as_ref().map(|o| o.type_token.clone()))
                .unwrap_or_default();

            let mut step = Step::new(op, d.urn.clone(), type_token, d.old.clone(), d.new.clone())
                .with_reason(d.reason.clone());
            step.changed_keys.clone_from(&d.changed_keys);
            step.recheck = d.recheck;

            if op == StepOp::Delete {
                let idx = asm.push(step);
                if let Some(old) = &d.old {
                    asm.deletes.push((old.clone(), idx));
                }
                continue;
            }

            let main = asm.push(step);
            asm.main.insert(d.urn.clone(), main);

            if op == StepOp::Replace
                && let Some(old) = &d.old
            {
                let delete = Step::new(
                    StepOp::DeleteReplaced,
                    d.urn.clone(),
                    old.type_token.clone(),
                    Some(old.clone()),
                    None,
                )
                .with_reason(if d.delete_before_replace {
                    "delete before replace"
                } else {
                    "replaced"
                });
                let delete = asm.push(delete);
                asm.deletes.push((old.clone(), delete));
                if d.delete_before_replace {
                    asm.depend(main, delete);
                }
            }
        }

        for old in &diff.leftover_replaced {
            let step = Step::new(
                StepOp::DeleteReplaced,
                old.urn.clone(),
                old.type_token.clone(),
                Some(old.clone()),
                None,
            )
            .with_reason("left over from an interrupted replacement");
            let idx = asm.push(step);
            asm.deletes.push((old.clone(), idx));
        }

        Self::link_creates(&mut asm);
        Self::link_deletes(&mut asm, diff);

        Ok(Self {
            created_at: Utc::now(),
            steps: Self::sort(asm.steps)?,
        })
    }

    /// Main steps wait for the main steps of their dependencies.
    fn link_creates(asm: &mut Assembly) {
        let edges: Vec<(usize, usize)> = asm
            .steps
            .iter()
            .enumerate()
            .filter(|(i, s)| asm.main.get(&s.urn) == Some(i))
            .flat_map(|(i, s)| {
                s.new
                    .iter()
                    .flat_map(|n| n.dependencies.iter())
                    .filter_map(|dep| asm.main.get(dep).map(|&d| (i, d)))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (step, on) in edges {
            asm.depend(step, on);
        }
    }

    /// Delete steps wait for everything that used the deleted resource.
    fn link_deletes(asm: &mut Assembly, diff: &DiffResult) {
        let recorded_dependencies: HashMap<&Urn, &[Urn]> = diff
            .diffs
            .iter()
            .filter_map(|d| d.old.as_ref().map(|o| (&d.urn, o.dependencies.as_slice())))
            .collect();
        let delete_first: BTreeSet<&Urn> = diff
            .diffs
            .iter()
            .filter(|d| d.kind == DiffKind::Replace && d.delete_before_replace)
            .map(|d| &d.urn)
            .collect();

        let mut edges = Vec::new();
        for (old, idx) in &asm.deletes {
            for (dependent, dependent_idx) in &asm.deletes {
                if dependent_idx != idx && dependent.dependencies.contains(&old.urn) {
                    edges.push((*idx, *dependent_idx));
                }
            }

            // The old half of a delete-before-replace runs before its own
            // replacement, so it cannot wait on anything created here.
            if !old.pending_replacement
                && asm.steps[*idx].op == StepOp::DeleteReplaced
                && delete_first.contains(&old.urn)
            {
                continue;
            }

            // Dependents that stay must stop using the old resource first.
            for (urn, &main) in &asm.main {
                if recorded_dependencies
                    .get(urn)
                    .is_some_and(|deps| deps.contains(&old.urn))
                {
                    edges.push((*idx, main));
                }
            }

            if let Some(&main) = asm.main.get(&old.urn) {
                edges.push((*idx, main));
            }
        }

        for (step, on) in edges {
            asm.depend(step, on);
        }
    }

    /// Orders steps topologically, lowest original index first among ready
    /// steps, and rewrites indices and dependencies.
    fn sort(mut steps: Vec<Step>) -> Result<Vec<Step>> {
        let n = steps.len();
        let mut remaining: Vec<usize> = steps.iter().map(|s| s.dependencies.len()).collect();
        let mut dependents = vec![Vec::new(); n];
        for (i, step) in steps.iter().enumerate() {
            for &dep in &step.dependencies {
                dependents[dep].push(i);
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

        if order.len() < n {
            let stuck: Vec<String> = (0..n)
                .filter(|&i| remaining[i] > 0)
                .map(|i| steps[i].description())
                .collect();
            return Err(PlanError::DependencyResolutionFailed {
                message: format!("step cycle among: {}", stuck.join(", ")),
            }
            .into());
        }

        let mut position = vec![0; n];
        for (new, &old) in order.iter().enumerate() {
            position[old] = new;
        }

        let mut slots: Vec<Option<Step>> = steps.drain(..).map(Some).collect();
        let mut sorted = Vec::with_capacity(n);
        for (new, &old) in order.iter().enumerate() {
            if let Some(mut step) = slots[old].take() {
                step.index = new;
                step.dependencies = step.dependencies.iter().map(|&d| position[d]).collect();
                step.dependencies.sort_unstable();
                sorted.push(step);
            }
        }
        Ok(sorted)
    }

    /// Step counts by operation.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for step in &self.steps {
            match step.op {
                StepOp::Create => summary.creates += 1,
                StepOp::Update => summary.updates += 1,
                StepOp::Replace => summary.replaces += 1,
                StepOp::Delete => summary.deletes += 1,
                StepOp::Same => summary.sames += 1,
                StepOp::Read => summary.reads += 1,
                StepOp::DeleteReplaced => {}
            }
        }
        summary
    }

    /// Returns true if any step changes something.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.steps.iter().any(|s| s.op.is_change())
    }

    /// Returns the number of steps.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the plan has no steps.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps with no dependencies.
    #[must_use]
    pub fn ready_steps(&self) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|s| s.dependencies.is_empty())
            .collect()
    }

    /// Steps that depend directly on `index`.
    #[must_use]
    pub fn dependent_steps(&self, index: usize) -> Vec<&Step> {
        self.steps
            .iter()
            .filter(|s| s.dependencies.contains(&index))
            .collect()
    }

    /// Finds the first step of an operation on a resource.
    #[must_use]
    pub fn find(&self, urn: &Urn, op: StepOp) -> Option<&Step> {
        self.steps.iter().find(|s| &s.urn == urn && s.op == op)
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} to import, {} unchanged",
            self.creates, self.updates, self.replaces, self.deletes, self.reads, self.sames
        )
    }
}

impl fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_changes() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Deployment Plan ({} steps):", self.steps.len())?;
        for step in self.steps.iter().filter(|s| s.op.is_change()) {
            writeln!(f, "  {:>2} {}. {step}", step.op.symbol(), step.index)?;
        }
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, ResourceGraph};
    use crate::planner::diff::{DiffOptions, Differ};
    use crate::resource::{PropertyValue, ResourceOptions, ResourceRegistration};
    use crate::state::Checkpoint;
    use crate::testing::{FakeProvider, fake_urn, gateway_with, recorded_checkpoint, thing};

    fn graph(regs: Vec<ResourceRegistration>) -> ResourceGraph {
        let mut builder = GraphBuilder::new("dev", "test");
        for reg in regs {
            builder.register(reg).unwrap();
        }
        builder.finalize().unwrap()
    }

    async fn plan(graph: &ResourceGraph, prior: Option<&Checkpoint>) -> DeploymentPlan {
        let gateway = gateway_with(FakeProvider::new());
        let diff = Differ::new(&gateway, DiffOptions::default())
            .diff(graph, prior)
            .await
            .unwrap();
        DeploymentPlan::from_diff(&diff).unwrap()
    }

    fn index(plan: &DeploymentPlan, name: &str, op: StepOp) -> usize {
        plan.find(&fake_urn(name), op)
            .unwrap_or_else(|| panic!("no {op} step for {name}"))
            .index
    }

    fn bucket_and_object(region: &str) -> ResourceGraph {
        graph(vec![
            thing("bucket").with_input("region", region),
            thing("object").with_input("bucket", PropertyValue::id_of(&fake_urn("bucket"))),
        ])
    }

    #[tokio::test]
    async fn test_creates_follow_dependencies() {
        let p = plan(&bucket_and_object("eu"), None).await;
        let bucket = index(&p, "bucket", StepOp::Create);
        let object = index(&p, "object", StepOp::Create);

        assert!(bucket < object);
        assert_eq!(p.steps[object].dependencies, vec![bucket]);
        assert_eq!(p.ready_steps().len(), 1);
        assert_eq!(p.summary().creates, 2);
    }

    #[tokio::test]
    async fn test_removed_resources_delete_dependents_first() {
        let before = bucket_and_object("eu");
        let prior = recorded_checkpoint(&before);

        let p = plan(&graph(vec![]), Some(&prior)).await;
        let bucket = index(&p, "bucket", StepOp::Delete);
        let object = index(&p, "object", StepOp::Delete);
        assert!(object < bucket);
        assert!(p.steps[bucket].dependencies.contains(&object));
    }

    #[tokio::test]
    async fn test_create_before_delete_replacement_order() {
        let prior = recorded_checkpoint(&bucket_and_object("eu"));
        let p = plan(&bucket_and_object("us"), Some(&prior)).await;

        let create_new = index(&p, "bucket", StepOp::Replace);
        let update_object = index(&p, "object", StepOp::Update);
        let delete_old = index(&p, "bucket", StepOp::DeleteReplaced);

        assert!(create_new < update_object);
        assert!(update_object < delete_old);
        let deps = &p.steps[delete_old].dependencies;
        assert!(deps.contains(&create_new));
        assert!(deps.contains(&update_object));
        assert_eq!(p.summary().replaces, 1);
    }

    #[tokio::test]
    async fn test_delete_before_replace_order() {
        let prior = recorded_checkpoint(&graph(vec![thing("a").with_input("region", "eu")]));
        let after = graph(vec![thing("a").with_input("region", "us").with_options(
            ResourceOptions {
                delete_before_replace: true,
                ..ResourceOptions::default()
            },
        )]);

        let p = plan(&after, Some(&prior)).await;
        let delete_old = index(&p, "a", StepOp::DeleteReplaced);
        let create_new = index(&p, "a", StepOp::Replace);
        assert!(delete_old < create_new);
        assert_eq!(p.steps[create_new].dependencies, vec![delete_old]);
    }

    #[tokio::test]
    async fn test_dropped_reference_updates_before_delete() {
        let before = bucket_and_object("eu");
        let prior = recorded_checkpoint(&before);
        let after = graph(vec![thing("object").with_input("bucket", "static")]);

        let p = plan(&after, Some(&prior)).await;
        let update = index(&p, "object", StepOp::Update);
        let delete = index(&p, "bucket", StepOp::Delete);
        assert!(p.steps[delete].dependencies.contains(&update));
    }

    #[tokio::test]
    async fn test_unchanged_plan_has_no_changes() {
        let g = bucket_and_object("eu");
        let prior = recorded_checkpoint(&g);
        let p = plan(&g, Some(&prior)).await;
        assert!(!p.has_changes());
        assert_eq!(p.summary().sames, 2);
        assert_eq!(p.to_string(), "No changes required");
    }

    #[tokio::test]
    async fn test_leftover_replacement_is_deleted() {
        let g = graph(vec![thing("a")]);
        let mut prior = recorded_checkpoint(&g);
        let mut old = prior.get(&fake_urn("a")).unwrap().clone();
        old.id = Some("a-old".into());
        old.pending_replacement = true;
        prior.resources.push(old);

        let p = plan(&g, Some(&prior)).await;
        let leftover = index(&p, "a", StepOp::DeleteReplaced);
        let same = index(&p, "a", StepOp::Same);
        assert!(p.steps[leftover].dependencies.contains(&same));
        assert!(p.has_changes());
    }
}
