//! Graph - Dependencies between resources derived from their references

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use crate::plan::PlanError;
use crate::resource::{Resource, ResourceId};

/// Dependency between resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Referenced resource
    pub target: ResourceId,
    /// Referenced attribute; `None` means the provider identifier
    pub attribute: Option<String>,
    /// Where this reference is used (e.g., "vpc_id")
    pub used_in: String,
}

/// Dependency graph for a set of resources
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<ResourceId>,
    /// Resource -> list of dependencies
    edges: BTreeMap<ResourceId, Vec<Dependency>>,
    /// Reverse edges: target -> resources that depend on it
    reverse_edges: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from every reference held by the given resources
    pub fn from_resources<'a>(resources: impl IntoIterator<Item = &'a Resource>) -> Self {
        let mut graph = Self::new();
        for resource in resources {
            graph.add_node(resource.id.clone());

            let mut names: Vec<_> = resource.attributes.keys().collect();
            names.sort();
            for name in names {
                let mut refs = Vec::new();
                resource.attributes[name.as_str()].collect_refs(&mut refs);
                for r in refs {
                    graph.add_edge(
                        resource.id.clone(),
                        Dependency {
                            target: r.target.clone(),
                            attribute: r.attribute.clone(),
                            used_in: name.clone(),
                        },
                    );
                }
            }
        }
        graph
    }

    pub fn add_node(&mut self, id: ResourceId) {
        self.nodes.insert(id);
    }

    /// Add a dependency edge
    pub fn add_edge(&mut self, from: ResourceId, dependency: Dependency) {
        self.nodes.insert(from.clone());
        self.nodes.insert(dependency.target.clone());
        self.reverse_edges
            .entry(dependency.target.clone())
            .or_default()
            .insert(from.clone());
        self.edges.entry(from).or_default().push(dependency);
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ResourceId> {
        self.nodes.iter()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.nodes.contains(id)
    }

    /// Get direct dependencies of a resource
    pub fn dependencies_of(&self, id: &ResourceId) -> &[Dependency] {
        self.edges.get(id).map_or(&[], |v| v.as_slice())
    }

    /// Distinct resources a resource directly depends on
    pub fn depends_on(&self, id: &ResourceId) -> BTreeSet<&ResourceId> {
        self.dependencies_of(id).iter().map(|d| &d.target).collect()
    }

    /// Get resources that directly depend on this resource
    pub fn dependents_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.reverse_edges
            .get(id)
            .map(|s| s.iter().collect())
            .unwrap_or_default()
    }

    /// Everything that depends on `id`, directly or not
    pub fn transitive_dependents(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.reach(id, |n| self.dependents_of(n))
    }

    /// Everything `id` depends on, directly or not
    pub fn transitive_dependencies(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        self.reach(id, |n| self.depends_on(n).into_iter().collect())
    }

    fn reach<'a, F>(&'a self, start: &ResourceId, next: F) -> BTreeSet<ResourceId>
    where
        F: Fn(&ResourceId) -> Vec<&'a ResourceId>,
    {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(node) = queue.pop_front() {
            for n in next(&node) {
                if n != start && seen.insert(n.clone()) {
                    queue.push_back(n.clone());
                }
            }
        }
        seen
    }

    /// Check if the graph has any cycles
    pub fn has_cycle(&self) -> bool {
        self.topological_order().is_err()
    }

    /// All nodes with every resource placed after its dependencies.
    ///
    /// Ties are broken by resource id so the order is stable.
    pub fn topological_order(&self) -> Result<Vec<ResourceId>, PlanError> {
        let mut sorted = Vec::with_capacity(self.nodes.len());
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();

        for node in &self.nodes {
            self.visit(node, &mut visited, &mut visiting, &mut sorted)?;
        }
        Ok(sorted)
    }

    fn visit<'a>(
        &'a self,
        node: &'a ResourceId,
        visited: &mut HashSet<&'a ResourceId>,
        visiting: &mut HashSet<&'a ResourceId>,
        sorted: &mut Vec<ResourceId>,
    ) -> Result<(), PlanError> {
        if visited.contains(node) {
            return Ok(());
        }
        if !visiting.insert(node) {
            return Err(PlanError::Cycle(node.clone()));
        }

        for dep in self.depends_on(node) {
            self.visit(dep, visited, visiting, sorted)?;
        }

        visiting.remove(node);
        visited.insert(node);
        sorted.push(node.clone());
        Ok(())
    }
}
