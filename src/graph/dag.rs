//! Validated resource dependency graph.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::resource::{DesiredResource, Urn};

/// A validated, acyclic resource graph.
///
/// Resources are kept in registration order; [`ResourceGraph::resources`]
/// yields them in a topological order that breaks ties by registration order.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    /// Stack name.
    stack: String,
    /// Project name.
    project: String,
    /// Resources in registration order.
    nodes: Vec<DesiredResource>,
    /// URN to node index.
    index: HashMap<Urn, usize>,
    /// Direct dependents of each node.
    dependents: Vec<Vec<usize>>,
    /// Topological order of node indices.
    order: Vec<usize>,
}

impl ResourceGraph {
    /// Assembles a graph from validated nodes and their topological order.
    pub(super) fn from_parts(
        stack: String,
        project: String,
        nodes: Vec<DesiredResource>,
        index: HashMap<Urn, usize>,
        order: Vec<usize>,
    ) -> Self {
        let mut dependents = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for dep in &node.dependencies {
                if let Some(&d) = index.get(dep) {
                    dependents[d].push(i);
                }
            }
        }

        Self {
            stack,
            project,
            nodes,
            index,
            dependents,
            order,
        }
    }

    /// Creates an empty graph, used when destroying a stack.
    #[must_use]
    pub fn empty(stack: &str, project: &str) -> Self {
        Self {
            stack: stack.to_string(),
            project: project.to_string(),
            ..Self::default()
        }
    }

    /// Stack name.
    #[must_use]
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Project name.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Number of resources.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if the URN is part of the graph.
    #[must_use]
    pub fn contains(&self, urn: &Urn) -> bool {
        self.index.contains_key(urn)
    }

    /// Gets a resource by URN.
    #[must_use]
    pub fn get(&self, urn: &Urn) -> Option<&DesiredResource> {
        self.index.get(urn).map(|&i| &self.nodes[i])
    }

    /// Iterates resources in topological order.
    pub fn resources(&self) -> impl Iterator<Item = &DesiredResource> {
        self.order.iter().map(|&i| &self.nodes[i])
    }

    /// URNs in topological order.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&Urn> {
        self.resources().map(|r| &r.urn).collect()
    }

    /// Direct dependencies of a resource.
    #[must_use]
    pub fn dependencies(&self, urn: &Urn) -> &[Urn] {
        self.get(urn)
            .map(|r| r.dependencies.as_slice())
            .unwrap_or_default()
    }

    /// Direct dependents of a resource.
    #[must_use]
    pub fn dependents(&self, urn: &Urn) -> Vec<&Urn> {
        self.index.get(urn).map_or_else(Vec::new, |&i| {
            self.dependents[i]
                .iter()
                .map(|&d| &self.nodes[d].urn)
                .collect()
        })
    }

    /// Every resource that depends on `urn`, directly or transitively.
    #[must_use]
    pub fn transitive_dependents(&self, urn: &Urn) -> BTreeSet<Urn> {
        let mut seen = BTreeSet::new();
        let Some(&start) = self.index.get(urn) else {
            return seen;
        };

        let mut queue = VecDeque::from([start]);
        while let Some(i) = queue.pop_front() {
            for &d in &self.dependents[i] {
                if seen.insert(self.nodes[d].urn.clone()) {
                    queue.push_back(d);
                }
            }
        }
        seen
    }
}
