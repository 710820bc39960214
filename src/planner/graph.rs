//! Dependency graph construction.
//!
//! Assembles descriptors into a directed acyclic graph keyed by logical name.
//! Descriptors and their references are visited in declaration order, so
//! errors come out the same on every run.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::error::GraphError;
use crate::resource::{ReferenceResolver, ResourceDescriptor};

use super::plan::Batches;

/// Dependency edge: `from` must be provisioned before `to`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Resource providing the output.
    pub from: String,
    /// Resource consuming it.
    pub to: String,
}

/// Validated dependency graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Descriptors in declaration order.
    nodes: Vec<Arc<ResourceDescriptor>>,
    /// Name -> position in `nodes`.
    index: HashMap<String, usize>,
    /// Per node: positions of the nodes it depends on.
    dependencies: Vec<Vec<usize>>,
    /// Per node: positions of the nodes depending on it.
    dependents: Vec<Vec<usize>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Builds and validates the graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateResource`] if two descriptors share a
    /// name, [`GraphError::UnresolvedReference`] if an input points at an
    /// undeclared resource, and [`GraphError::CyclicDependency`] if the
    /// references form a cycle.
    pub fn build(descriptors: Vec<ResourceDescriptor>) -> Result<Self, GraphError> {
        let resolver = ReferenceResolver::new();

        let mut index = HashMap::with_capacity(descriptors.len());
        for (i, descriptor) in descriptors.iter().enumerate() {
            if index.insert(descriptor.name().to_string(), i).is_some() {
                return Err(GraphError::DuplicateResource {
                    name: descriptor.name().to_string(),
                });
            }
        }

        let known: HashSet<&str> = descriptors.iter().map(ResourceDescriptor::name).collect();
        let mut dependencies = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let mut deps: Vec<usize> = Vec::new();
            for reference in resolver.resolve(descriptor, &known)? {
                let target = index[reference.target.resource.as_str()];
                if !deps.contains(&target) {
                    deps.push(target);
                }
            }
            dependencies.push(deps);
        }

        let mut dependents = vec![Vec::new(); descriptors.len()];
        for (to, deps) in dependencies.iter().enumerate() {
            for &from in deps {
                dependents[from].push(to);
            }
        }

        let graph = Self {
            nodes: descriptors.into_iter().map(Arc::new).collect(),
            index,
            dependencies,
            dependents,
        };
        graph.detect_cycles()?;

        debug!(
            "Built dependency graph: {} resources, {} edges",
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Depth-first search with three-colour marking. A back-edge to an
    /// in-progress node closes a cycle.
    ///
    /// The traversal keeps an explicit stack of `(node, next dependency)`
    /// frames, so chain length is bounded by memory rather than call depth.
    fn detect_cycles(&self) -> Result<(), GraphError> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut frames: Vec<(usize, usize)> = Vec::new();

        for start in 0..self.nodes.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            marks[start] = Mark::InProgress;
            frames.push((start, 0));

            while let Some(frame) = frames.last_mut() {
                let (node, next) = *frame;
                let Some(&dep) = self.dependencies[node].get(next) else {
                    marks[node] = Mark::Done;
                    frames.pop();
                    continue;
                };
                frame.1 += 1;

                match marks[dep] {
                    Mark::InProgress => {
                        let first = frames.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                        let cycle = frames[first..]
                            .iter()
                            .map(|&(n, _)| self.nodes[n].name().to_string())
                            .collect();
                        return Err(GraphError::CyclicDependency { cycle });
                    }
                    Mark::Unvisited => {
                        marks[dep] = Mark::InProgress;
                        frames.push((dep, 0));
                    }
                    Mark::Done => {}
                }
            }
        }
        Ok(())
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of dependency edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dependencies.iter().map(Vec::len).sum()
    }

    /// Descriptors in declaration order.
    #[must_use]
    pub fn descriptors(&self) -> &[Arc<ResourceDescriptor>] {
        &self.nodes
    }

    /// Looks up a descriptor by name.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&Arc<ResourceDescriptor>> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// Declaration position of a resource.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Resources `name` depends on directly.
    #[must_use]
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.index.get(name).map_or_else(Vec::new, |&i| {
            self.dependencies[i]
                .iter()
                .map(|&d| self.nodes[d].name())
                .collect()
        })
    }

    /// Resources depending directly on `name`.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.index.get(name).map_or_else(Vec::new, |&i| {
            self.dependents[i]
                .iter()
                .map(|&d| self.nodes[d].name())
                .collect()
        })
    }

    /// All edges, grouped by consumer in declaration order.
    #[must_use]
    pub fn edges(&self) -> Vec<Edge> {
        self.dependencies
            .iter()
            .enumerate()
            .flat_map(|(to, deps)| {
                deps.iter().map(move |&from| Edge {
                    from: self.nodes[from].name().to_string(),
                    to: self.nodes[to].name().to_string(),
                })
            })
            .collect()
    }

    /// Lazily yields execution batches using Kahn's algorithm.
    #[must_use]
    pub fn batches(&self) -> Batches<'_> {
        Batches::new(self)
    }

    pub(super) fn dependency_positions(&self, node: usize) -> &[usize] {
        &self.dependencies[node]
    }

    pub(super) fn dependent_positions(&self, node: usize) -> &[usize] {
        &self.dependents[node]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::InputValue;

    fn resource(name: &str, deps: &[&str]) -> ResourceDescriptor {
        deps.iter().fold(
            ResourceDescriptor::new("test:Resource", name),
            |descriptor, dep| descriptor.with_input(format!("{dep}Id"), InputValue::output(*dep, "id")),
        )
    }

    #[test]
    fn test_build_records_edges() {
        let graph = DependencyGraph::build(vec![
            resource("rg", &[]),
            resource("vnet", &["rg"]),
            resource("subnet", &["rg", "vnet"]),
        ])
        .unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.dependencies_of("subnet"), vec!["rg", "vnet"]);
        assert_eq!(graph.dependents_of("rg"), vec!["vnet", "subnet"]);
        assert_eq!(
            graph.edges()[0],
            Edge {
                from: String::from("rg"),
                to: String::from("vnet"),
            }
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = DependencyGraph::build(vec![resource("rg", &[]), resource("rg", &[])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::DuplicateResource {
                name: String::from("rg"),
            }
        );
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let err = DependencyGraph::build(vec![resource("vm", &["nic"])]).unwrap_err();
        assert!(matches!(
            err,
            GraphError::UnresolvedReference { ref resource, ref target, .. }
                if resource == "vm" && target == "nic"
        ));
    }

    #[test]
    fn test_two_node_cycle_names_both() {
        let err = DependencyGraph::build(vec![resource("a", &["b"]), resource("b", &["a"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicDependency {
                cycle: vec![String::from("a"), String::from("b")],
            }
        );
    }

    #[test]
    fn test_cycle_reported_in_traversal_order() {
        let err = DependencyGraph::build(vec![
            resource("root", &["x"]),
            resource("x", &["y"]),
            resource("y", &["z"]),
            resource("z", &["x"]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicDependency {
                cycle: vec![String::from("x"), String::from("y"), String::from("z")],
            }
        );
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let err = DependencyGraph::build(vec![resource("loop", &["loop"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicDependency {
                cycle: vec![String::from("loop")],
            }
        );
    }

    #[test]
    fn test_long_chain_builds_without_recursion() {
        let mut descriptors = vec![resource("n0", &[])];
        for i in 1..20_000 {
            let prev = format!("n{}", i - 1);
            descriptors.push(resource(&format!("n{i}"), &[prev.as_str()]));
        }
        let graph = DependencyGraph::build(descriptors).unwrap();
        assert_eq!(graph.edge_count(), 19_999);

        let mut looped = vec![resource("n0", &["n4999"])];
        for i in 1..5_000 {
            let prev = format!("n{}", i - 1);
            looped.push(resource(&format!("n{i}"), &[prev.as_str()]));
        }
        let err = DependencyGraph::build(looped).unwrap_err();
        assert!(matches!(
            err,
            GraphError::CyclicDependency { ref cycle } if cycle.len() == 5_000 && cycle[0] == "n0"
        ));
    }
}
