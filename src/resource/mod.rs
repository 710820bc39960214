//! Resource declarations.
//!
//! This module defines what a resource looks like before provisioning:
//! - Descriptors with a type, a logical name and ordered inputs
//! - Input values, literal or deferred
//! - Reference resolution to discover dependencies

mod descriptor;
mod input;
mod resolver;

pub use descriptor::{ResourceDescriptor, ResourceType};
pub use input::{ComputeFn, Computed, InputValue, OutputRef, ResolvedInputs, ValueLookup};
pub use resolver::{ConfigRequirement, Reference, ReferenceResolver, output_refs};
