//! Planning and execution.
//!
//! This module turns resource descriptors into a dependency graph, orders it
//! into batches, runs the batches against a provisioning engine and diffs a
//! plan against the last run record.

mod diff;
mod executor;
mod graph;
mod plan;

pub use diff::{DiffEngine, DiffResult, DiffType, ResourceDiff};
pub use executor::{
    DEFAULT_RESOURCE_TIMEOUT_SECS, ExecutionOptions, Executor, ResourceFailure, RunResult,
    SkippedResource, is_static,
};
pub use graph::{DependencyGraph, Edge};
pub use plan::{Batch, Batches, ExecutionPlan, plan};
