//! Streaming graph construction from resource registrations.

use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use crate::error::{GraphError, Result};
use crate::resource::{references, DesiredResource, ResourceRegistration, Urn};

use super::dag::ResourceGraph;

/// DFS node colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Builds a [`ResourceGraph`] from registrations arriving one at a time.
///
/// References may point at resources registered later; they are only
/// required to resolve when [`GraphBuilder::finalize`] is called.
#[derive(Debug)]
pub struct GraphBuilder {
    /// Stack name.
    stack: String,
    /// Project name.
    project: String,
    /// Registered resources, in order.
    nodes: Vec<DesiredResource>,
    /// URN to node index.
    index: HashMap<Urn, usize>,
}

impl GraphBuilder {
    /// Creates a builder for a stack.
    #[must_use]
    pub fn new(stack: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            project: project.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Number of registered resources.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing has been registered.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Computes the URN a registration would receive.
    #[must_use]
    pub fn urn_for(&self, registration: &ResourceRegistration) -> Urn {
        Urn::new(
            &self.stack,
            &self.project,
            registration.parent.as_ref(),
            &registration.type_token,
            &registration.name,
        )
    }

    /// Registers a resource and returns its URN.
    ///
    /// # Errors
    ///
    /// Returns an error if the URN is already registered, the type token is
    /// malformed, or the parent has not been registered yet.
    pub fn register(&mut self, registration: ResourceRegistration) -> Result<Urn> {
        crate::resource::package_of(&registration.type_token)?;

        let urn = self.urn_for(&registration);

        if self.index.contains_key(&urn) {
            return Err(GraphError::DuplicateUrn {
                urn: urn.to_string(),
            }
            .into());
        }

        if let Some(parent) = &registration.parent
            && !self.index.contains_key(parent)
        {
            return Err(GraphError::UnknownParent {
                urn: urn.to_string(),
                parent: parent.to_string(),
            }
            .into());
        }

        let mut seen = BTreeSet::new();
        let mut dependencies = Vec::new();
        let implicit = references(&registration.inputs);
        for dep in registration
            .parent
            .iter()
            .chain(registration.depends_on.iter())
            .chain(implicit.iter())
        {
            if seen.insert(dep.clone()) {
                dependencies.push(dep.clone());
            }
        }

        debug!(
            urn = %urn,
            dependencies = dependencies.len(),
            "Registered resource"
        );

        self.index.insert(urn.clone(), self.nodes.len());
        self.nodes.push(DesiredResource {
            urn: urn.clone(),
            type_token: registration.type_token,
            parent: registration.parent,
            custom: registration.custom,
            inputs: registration.inputs,
            dependencies,
            options: registration.options,
        });

        Ok(urn)
    }

    /// Validates the registrations and produces the graph.
    ///
    /// # Errors
    ///
    /// Returns an error for a dependency on an unregistered resource or a
    /// dependency cycle.
    pub fn finalize(self) -> Result<ResourceGraph> {
        for node in &self.nodes {
            for dep in &node.dependencies {
                if !self.index.contains_key(dep) {
                    return Err(GraphError::DanglingDependency {
                        from: node.urn.to_string(),
                        to: dep.to_string(),
                    }
                    .into());
                }
            }
        }

        if let Some(cycle) = self.find_cycle() {
            return Err(GraphError::Cycle {
                cycle: cycle.iter().map(ToString::to_string).collect(),
            }
            .into());
        }

        let order = self.topological_order();
        info!(
            resources = self.nodes.len(),
            stack = %self.stack,
            "Resource graph finalized"
        );

        Ok(ResourceGraph::from_parts(
            self.stack,
            self.project,
            self.nodes,
            self.index,
            order,
        ))
    }

    fn dependency_indices(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes[node]
            .dependencies
            .iter()
            .filter_map(|dep| self.index.get(dep).copied())
    }

    /// Returns the first cycle found, first URN repeated at the end.
    ///
    /// Depth-first with an explicit stack, so chain length is not bounded by
    /// the thread stack.
    fn find_cycle(&self) -> Option<Vec<Urn>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        // The current path: each node with the next dependency to try.
        let mut frames: Vec<(usize, usize)> = Vec::new();

        for start in 0..self.nodes.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            marks[start] = Mark::InProgress;
            frames.push((start, 0));

            while let Some(frame) = frames.last_mut() {
                let node = frame.0;
                let next = self.nodes[node].dependencies.get(frame.1);
                frame.1 += 1;

                let Some(dep_urn) = next else {
                    marks[node] = Mark::Done;
                    frames.pop();
                    continue;
                };
                let Some(&dep) = self.index.get(dep_urn) else {
                    continue;
                };

                match marks[dep] {
                    Mark::InProgress => {
                        let begin = frames.iter().position(|&(n, _)| n == dep).unwrap_or_default();
                        let mut cycle: Vec<Urn> = frames[begin..]
                            .iter()
                            .map(|&(n, _)| self.nodes[n].urn.clone())
                            .collect();
                        cycle.push(self.nodes[dep].urn.clone());
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        marks[dep] = Mark::InProgress;
                        frames.push((dep, 0));
                    }
                    Mark::Done => {}
                }
            }
        }
        None
    }

    /// Kahn's algorithm, smallest registration index first among ready nodes.
    fn topological_order(&self) -> Vec<usize> {
        let n = self.nodes.len();
        let mut remaining: Vec<usize> = (0..n).map(|i| self.dependency_indices(i).count()).collect();
        let mut dependents = vec![Vec::new(); n];
        for i in 0..n {
            for dep in self.dependency_indices(i) {
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
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StrataError;
    use crate::resource::PropertyValue;

    fn builder() -> GraphBuilder {
        GraphBuilder::new("dev", "test")
    }

    fn urn(name: &str) -> Urn {
        Urn::new("dev", "test", None, "test:index:Thing", name)
    }

    fn thing(name: &str) -> ResourceRegistration {
        ResourceRegistration::new("test:index:Thing", name)
    }

    #[test]
    fn test_duplicate_urn_rejected() {
        let mut b = builder();
        b.register(thing("a")).unwrap();
        let err = b.register(thing("a")).unwrap_err();
        assert!(matches!(err, StrataError::Graph(GraphError::DuplicateUrn { .. })));
    }

    #[test]
    fn test_same_name_different_type_allowed() {
        let mut b = builder();
        b.register(thing("a")).unwrap();
        b.register(ResourceRegistration::new("test:index:Other", "a"))
            .unwrap();
        assert_eq!(b.finalize().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_type_token_rejected() {
        let mut b = builder();
        let err = b.register(ResourceRegistration::new("Thing", "a")).unwrap_err();
        assert!(matches!(err, StrataError::Graph(GraphError::InvalidTypeToken { .. })));
    }

    #[test]
    fn test_implicit_and_explicit_dependencies() {
        let mut b = builder();
        b.register(thing("a")).unwrap();
        b.register(thing("b")).unwrap();
        let c = b
            .register(
                thing("c")
                    .with_input("x", PropertyValue::output(&urn("a"), "arn"))
                    .depends_on(&urn("b"))
                    .depends_on(&urn("a")),
            )
            .unwrap();

        let graph = b.finalize().unwrap();
        assert_eq!(graph.dependencies(&c), &[urn("b"), urn("a")]);
        assert_eq!(graph.dependents(&urn("a")), vec![&c]);
    }

    #[test]
    fn test_forward_reference_resolves_at_finalize() {
        let mut b = builder();
        b.register(thing("object").with_input("bucket", PropertyValue::id_of(&urn("bucket"))))
            .unwrap();
        b.register(thing("bucket")).unwrap();

        let graph = b.finalize().unwrap();
        let order: Vec<&str> = graph.topological_order().iter().map(|u| u.name()).collect();
        assert_eq!(order, vec!["bucket", "object"]);
    }

    #[test]
    fn test_dangling_dependency_rejected() {
        let mut b = builder();
        b.register(thing("a").depends_on(&urn("missing"))).unwrap();
        let err = b.finalize().unwrap_err();
        assert!(matches!(err, StrataError::Graph(GraphError::DanglingDependency { .. })));
    }

    #[test]
    fn test_cycle_reported_in_order() {
        let mut b = builder();
        b.register(thing("a").depends_on(&urn("b"))).unwrap();
        b.register(thing("b").depends_on(&urn("c"))).unwrap();
        b.register(thing("c").depends_on(&urn("a"))).unwrap();

        match b.finalize() {
            Err(StrataError::Graph(GraphError::Cycle { cycle })) => {
                let names: Vec<String> = cycle
                    .iter()
                    .map(|u| Urn::parse(u).unwrap().name().to_string())
                    .collect();
                assert_eq!(names, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_long_chain_finalizes() {
        // Each link depends on the one registered after it, so the cycle
        // search walks the whole chain from the first node.
        const LINKS: usize = 100_000;
        let mut b = builder();
        for i in 0..LINKS {
            let mut link = thing(&format!("link-{i}"));
            if i + 1 < LINKS {
                link = link.depends_on(&urn(&format!("link-{}", i + 1)));
            }
            b.register(link).unwrap();
        }

        let graph = b.finalize().unwrap();
        let order = graph.topological_order();
        assert_eq!(order.len(), LINKS);
        assert_eq!(order[0], &urn(&format!("link-{}", LINKS - 1)));
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let mut b = builder();
        b.register(thing("a").with_input("me", PropertyValue::id_of(&urn("a"))))
            .unwrap();
        assert!(matches!(
            b.finalize(),
            Err(StrataError::Graph(GraphError::Cycle { .. }))
        ));
    }

    #[test]
    fn test_parent_must_precede_child() {
        let mut b = builder();
        let parent = urn("site");
        let err = b
            .register(ResourceRegistration::new("file:index:File", "index").with_parent(&parent))
            .unwrap_err();
        assert!(matches!(err, StrataError::Graph(GraphError::UnknownParent { .. })));

        b.register(ResourceRegistration::component("test:index:Thing", "site"))
            .unwrap();
        let child = b
            .register(ResourceRegistration::new("file:index:File", "index").with_parent(&parent))
            .unwrap();
        let graph = b.finalize().unwrap();
        assert_eq!(graph.dependencies(&child), &[parent]);
    }

    #[test]
    fn test_transitive_dependents() {
        let mut b = builder();
        b.register(thing("a")).unwrap();
        b.register(thing("b").depends_on(&urn("a"))).unwrap();
        b.register(thing("c").depends_on(&urn("b"))).unwrap();
        b.register(thing("d")).unwrap();

        let graph = b.finalize().unwrap();
        let deps = graph.transitive_dependents(&urn("a"));
        assert!(deps.contains(&urn("b")));
        assert!(deps.contains(&urn("c")));
        assert!(!deps.contains(&urn("d")));
    }
}
