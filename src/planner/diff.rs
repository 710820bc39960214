//! Diff between a plan and the last run record.
//!
//! The diff is informational. `apply` provisions every resource regardless,
//! so it only tells the operator what changed since the last run.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::config::ConfigHasher;
use crate::state::{ResourceStatus, StackState};

use super::executor::is_static;
use super::plan::ExecutionPlan;

/// Engine for computing diffs between a plan and the run record.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Descriptor hasher.
    hasher: ConfigHasher,
}

/// Difference for a single resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDiff {
    /// Resource name.
    pub name: String,
    /// Provider resource kind.
    pub resource_type: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Hash recorded by the last run.
    pub old_hash: Option<String>,
    /// Hash of the planned descriptor.
    pub new_hash: Option<String>,
    /// Human-readable notes.
    pub details: Vec<String>,
    /// Input fields whose value is only known during the run.
    pub deferred_inputs: Vec<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    /// Not in the record.
    Create,
    /// In the record with a different hash, or last attempt failed.
    Update,
    /// Same hash as the last successful run.
    NoChange,
    /// In the record but no longer declared.
    Orphaned,
}

/// Complete diff result.
#[derive(Debug, Clone, Serialize)]
pub struct DiffResult {
    /// All resource diffs, in plan order then orphans.
    pub diffs: Vec<ResourceDiff>,
    /// Number of new resources.
    pub creates: usize,
    /// Number of changed resources.
    pub updates: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
    /// Number of recorded resources no longer declared.
    pub orphaned: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Computes the diff between `plan` and the record of the last run.
    #[must_use]
    pub fn compute(&self, plan: &ExecutionPlan, state: Option<&StackState>) -> DiffResult {
        let mut diffs = Vec::with_capacity(plan.resource_count());

        for name in plan.ordered_resources() {
            let Some(descriptor) = plan.descriptor(name) else {
                continue;
            };
            let new_hash = self.hasher.hash_descriptor(descriptor);
            let record = state.and_then(|s| s.get_resource(name));

            let deferred_inputs = descriptor
                .inputs()
                .iter()
                .filter(|(_, value)| !is_static(value))
                .map(|(field, _)| field.clone())
                .collect();

            let (diff_type, details) = match record {
                None => (DiffType::Create, Vec::new()),
                Some(record) => {
                    let mut details = Vec::new();
                    if record.resource_type != descriptor.resource_type().as_str() {
                        details.push(format!(
                            "type: {} -> {}",
                            record.resource_type,
                            descriptor.resource_type()
                        ));
                    }
                    if !ConfigHasher::hashes_match(&record.input_hash, &new_hash) {
                        details.push(format!(
                            "inputs: {} -> {}",
                            ConfigHasher::short_hash(&record.input_hash),
                            ConfigHasher::short_hash(&new_hash)
                        ));
                    }
                    if record.status == ResourceStatus::Failed {
                        details.push(format!(
                            "last attempt failed: {}",
                            record.error.as_deref().unwrap_or("unknown error")
                        ));
                    }
                    let diff_type = if details.is_empty() {
                        DiffType::NoChange
                    } else {
                        DiffType::Update
                    };
                    (diff_type, details)
                }
            };

            debug!("Resource {name}: {diff_type}");
            diffs.push(ResourceDiff {
                name: name.to_string(),
                resource_type: descriptor.resource_type().to_string(),
                diff_type,
                old_hash: record.map(|r| r.input_hash.clone()),
                new_hash: Some(new_hash),
                details,
                deferred_inputs,
            });
        }

        if let Some(state) = state {
            let declared: HashSet<&str> = plan.ordered_resources().into_iter().collect();
            for record in state.resources.values() {
                if !declared.contains(record.name.as_str()) {
                    debug!("Found orphaned resource: {}", record.name);
                    diffs.push(ResourceDiff {
                        name: record.name.clone(),
                        resource_type: record.resource_type.clone(),
                        diff_type: DiffType::Orphaned,
                        old_hash: Some(record.input_hash.clone()),
                        new_hash: None,
                        details: vec![String::from("no longer declared; not deleted")],
                        deferred_inputs: Vec::new(),
                    });
                }
            }
        }

        let count = |kind: DiffType| diffs.iter().filter(|d| d.diff_type == kind).count();
        let creates = count(DiffType::Create);
        let updates = count(DiffType::Update);
        let unchanged = count(DiffType::NoChange);
        let orphaned = count(DiffType::Orphaned);

        DiffResult {
            diffs,
            creates,
            updates,
            unchanged,
            orphaned,
        }
    }
}

impl DiffResult {
    /// Returns true if nothing changed since the last run.
    #[must_use]
    pub const fn is_unchanged(&self) -> bool {
        self.creates == 0 && self.updates == 0 && self.orphaned == 0
    }

    /// Gets the diff of a resource by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceDiff> {
        self.diffs.iter().find(|d| d.name == name)
    }
}

impl fmt::Display for DiffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::NoChange => "no change",
            Self::Orphaned => "orphaned",
        };
        write!(f, "{label}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan::plan;
    use crate::resource::{InputValue, ResourceDescriptor};
    use serde_json::json;

    fn stack() -> ExecutionPlan {
        plan(vec![
            ResourceDescriptor::new("azure-native:resources:ResourceGroup", "rg")
                .with_input("location", InputValue::literal("westeurope")),
            ResourceDescriptor::new("azure-native:storage:StorageAccount", "storage")
                .with_input("resourceGroupName", InputValue::output("rg", "name"))
                .with_input("sku", InputValue::literal(json!({"name": "Standard_LRS"}))),
        ])
        .unwrap()
    }

    fn recorded(plan: &ExecutionPlan) -> StackState {
        let hasher = ConfigHasher::new();
        let mut state = StackState::new("backstage", "dev");
        for name in plan.ordered_resources() {
            let descriptor = plan.descriptor(name).unwrap();
            state.record_success(
                name,
                descriptor.resource_type().as_str(),
                &hasher.hash_descriptor(descriptor),
                Default::default(),
            );
        }
        state
    }

    #[test]
    fn test_everything_created_without_record() {
        let diff = DiffEngine::new().compute(&stack(), None);
        assert_eq!(diff.creates, 2);
        assert!(!diff.is_unchanged());
        assert_eq!(diff.diffs[0].name, "rg");
        assert_eq!(diff.get("storage").unwrap().deferred_inputs, vec!["resourceGroupName"]);
    }

    #[test]
    fn test_unchanged_after_successful_run() {
        let plan = stack();
        let state = recorded(&plan);
        let diff = DiffEngine::new().compute(&plan, Some(&state));
        assert_eq!(diff.unchanged, 2);
        assert!(diff.is_unchanged());
    }

    #[test]
    fn test_changed_input_and_failed_attempt_are_updates() {
        let plan = stack();
        let mut state = recorded(&plan);
        state.resources.get_mut("rg").unwrap().input_hash = String::from("0123456789abcdef");
        let storage_hash = state.get_resource("storage").unwrap().input_hash.clone();
        state.record_failure(
            "storage",
            "azure-native:storage:StorageAccount",
            &storage_hash,
            "name already taken",
        );

        let diff = DiffEngine::new().compute(&plan, Some(&state));
        assert_eq!(diff.updates, 2);
        assert!(diff.get("rg").unwrap().details[0].starts_with("inputs: 01234567 -> "));
        assert!(diff.get("storage").unwrap().details[0].contains("name already taken"));
    }

    #[test]
    fn test_undeclared_record_is_orphaned() {
        let plan = stack();
        let mut state = recorded(&plan);
        state.record_success("cache", "azure-native:cache:Redis", "h", Default::default());

        let diff = DiffEngine::new().compute(&plan, Some(&state));
        assert_eq!(diff.orphaned, 1);
        let orphan = diff.get("cache").unwrap();
        assert_eq!(orphan.diff_type, DiffType::Orphaned);
        assert!(orphan.new_hash.is_none());
    }
}
