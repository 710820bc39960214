// ============================================================================
// Linting - Dangerous or non-idiomatic practices are flagged
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![warn(missing_docs)]                // Public items should be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stackgraph
//!
//! Declarative infrastructure stacks provisioned in dependency order.
//!
//! ## Overview
//!
//! A stack declares resources whose inputs may reference the outputs of
//! other resources. Stackgraph:
//!
//! - Discovers dependencies from those references and rejects cycles
//! - Orders resources into batches that can be provisioned concurrently
//! - Hands each resource to a provisioning engine once its inputs resolve
//! - Resolves stack exports and records every run
//!
//! ## Architecture
//!
//! 1. **Declaration**: `stackgraph.yaml` becomes a list of resource descriptors
//! 2. **Planning**: descriptors form a dependency graph, peeled into batches
//! 3. **Execution**: batches run against the engine; outputs flow through a
//!    shared output store that unblocks downstream consumers
//!
//! ## Modules
//!
//! - [`resource`]: Descriptors, input values and reference discovery
//! - [`planner`]: Dependency graph, batch planning, execution and diffs
//! - [`outputs`]: Per-key output store with blocking and callback reads
//! - [`engine`]: Provisioning engine and configuration/secret capabilities
//! - [`config`]: Stack file parsing, validation and hashing
//! - [`state`]: Run record storage
//! - [`runner`]: End-to-end plan and apply for one stack
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: backstage
//!   environment: dev
//!
//! resources:
//!   - name: resourceGroup
//!     type: azure-native:resources:ResourceGroup
//!     inputs:
//!       location: { config: location }
//!   - name: registry
//!     type: azure-native:containerregistry:Registry
//!     inputs:
//!       resourceGroupName: { ref: resourceGroup.name }
//!       sku: { name: Basic }
//!
//! outputs:
//!   loginServer: { ref: registry.loginServer }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod outputs;
pub mod planner;
pub mod resource;
pub mod runner;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, StackConfig};
pub use engine::{ConfigSource, HttpProvisioner, Provisioner, StackConfigSource};
pub use error::{Result, StackError};
pub use outputs::{OutputStore, Outputs};
pub use planner::{DependencyGraph, ExecutionPlan, Executor, RunResult, plan};
pub use resource::{InputValue, ResourceDescriptor};
pub use runner::{ApplyReport, Preview, StackRunner};
pub use state::{LocalStateStore, StackState, StateStore};
