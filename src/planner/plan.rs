//! Execution plans.
//!
//! A plan is an ordered sequence of batches. Members of a batch do not depend
//! on each other and may be provisioned concurrently; every dependency of a
//! batch member sits in an earlier batch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::error::Result;
use crate::resource::ResourceDescriptor;

use super::graph::DependencyGraph;

/// One set of mutually independent resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    /// Position of the batch in the plan.
    pub index: usize,
    /// Resource names in declaration order.
    pub resources: Vec<String>,
}

/// Lazy batch sequence produced by Kahn's algorithm.
///
/// Each call to `next` peels every node whose dependencies have all been
/// emitted. The sequence is finite and cannot be restarted; call
/// [`DependencyGraph::batches`] again for a fresh one.
#[derive(Debug)]
pub struct Batches<'g> {
    graph: &'g DependencyGraph,
    in_degree: Vec<usize>,
    ready: Vec<usize>,
    emitted: usize,
}

/// Complete execution plan for a validated graph.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    graph: DependencyGraph,
    batches: Vec<Batch>,
}

impl<'g> Batches<'g> {
    pub(super) fn new(graph: &'g DependencyGraph) -> Self {
        let in_degree: Vec<usize> = (0..graph.len())
            .map(|i| graph.dependency_positions(i).len())
            .collect();
        let ready = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();

        Self {
            graph,
            in_degree,
            ready,
            emitted: 0,
        }
    }
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.ready.is_empty() {
            return None;
        }

        let current = std::mem::take(&mut self.ready);
        let mut next_ready = Vec::new();
        for &node in &current {
            for &dependent in self.graph.dependent_positions(node) {
                self.in_degree[dependent] -= 1;
                if self.in_degree[dependent] == 0 {
                    next_ready.push(dependent);
                }
            }
        }
        // Declaration order is the tie-break inside a batch.
        next_ready.sort_unstable();
        self.ready = next_ready;

        let index = self.emitted;
        self.emitted += 1;
        Some(Batch {
            index,
            resources: current
                .into_iter()
                .map(|i| self.graph.descriptors()[i].name().to_string())
                .collect(),
        })
    }
}

impl ExecutionPlan {
    /// Collects every batch of a validated graph.
    #[must_use]
    pub fn from_graph(graph: DependencyGraph) -> Self {
        let batches = graph.batches().collect();
        Self {
            created_at: Utc::now(),
            graph,
            batches,
        }
    }

    /// Ordered batches.
    #[must_use]
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// The graph the plan was computed from.
    #[must_use]
    pub const fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Descriptor of a planned resource.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&Arc<ResourceDescriptor>> {
        self.graph.descriptor(name)
    }

    /// Index of the batch containing `name`.
    #[must_use]
    pub fn batch_of(&self, name: &str) -> Option<usize> {
        self.batches
            .iter()
            .find(|b| b.resources.iter().any(|r| r == name))
            .map(|b| b.index)
    }

    /// Number of planned resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.graph.len()
    }

    /// Returns true if there is nothing to provision.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Resource names in execution order.
    #[must_use]
    pub fn ordered_resources(&self) -> Vec<&str> {
        self.batches
            .iter()
            .flat_map(|b| b.resources.iter().map(String::as_str))
            .collect()
    }
}

/// Builds the graph for `descriptors` and plans it.
///
/// Pure: no provisioning happens, so it is safe to call repeatedly for
/// dry runs.
///
/// # Errors
///
/// Returns a graph error for duplicate names, unresolved references or cycles.
pub fn plan(descriptors: Vec<ResourceDescriptor>) -> Result<ExecutionPlan> {
    let graph = DependencyGraph::build(descriptors)?;
    Ok(ExecutionPlan::from_graph(graph))
}
