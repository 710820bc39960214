//! Run record types.
//!
//! The record keeps what the last runs provisioned: per-resource input hash,
//! status and outputs, the stack exports, and a bounded history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::outputs::Outputs;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of history entries kept.
pub const MAX_HISTORY: usize = 100;

/// The complete run record of a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last applied stack file.
    pub config_hash: String,
    /// Record per resource, keyed by logical name.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    /// Resolved stack exports.
    #[serde(default)]
    pub exports: BTreeMap<String, Value>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// Record of one resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    /// Logical name.
    pub name: String,
    /// Provider resource kind.
    pub resource_type: String,
    /// Hash of the descriptor when last attempted.
    pub input_hash: String,
    /// Outcome of the last attempt.
    pub status: ResourceStatus,
    /// Outputs of the last successful attempt.
    #[serde(default)]
    pub outputs: Outputs,
    /// Error of the last failed attempt.
    #[serde(default)]
    pub error: Option<String>,
    /// When the resource was first recorded.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

/// Outcome of the last attempt at a resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// The engine reported success.
    Provisioned,
    /// Provisioning failed.
    Failed,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: RunOperation,
    /// Stack hash at time of the run.
    pub config_hash: String,
    /// Resources provisioned.
    pub resources: Vec<String>,
    /// Whether every resource was provisioned.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of run operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// First apply of the stack.
    Create,
    /// Apply over an existing record.
    Update,
}

impl StackState {
    /// Creates a new empty record.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            config_hash: String::new(),
            resources: BTreeMap::new(),
            exports: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a resource record by name.
    #[must_use]
    pub fn get_resource(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.get(name)
    }

    /// Records a successful provisioning.
    pub fn record_success(&mut self, name: &str, resource_type: &str, input_hash: &str, outputs: Outputs) {
        let now = Utc::now();
        let record = self
            .resources
            .entry(name.to_string())
            .or_insert_with(|| ResourceRecord::new(name, resource_type, input_hash));
        record.resource_type = resource_type.to_string();
        record.input_hash = input_hash.to_string();
        record.status = ResourceStatus::Provisioned;
        record.outputs = outputs;
        record.error = None;
        record.updated_at = now;
        self.last_updated = now;
    }

    /// Records a failed attempt. Outputs of an earlier success are kept.
    pub fn record_failure(&mut self, name: &str, resource_type: &str, input_hash: &str, error: &str) {
        let now = Utc::now();
        let record = self
            .resources
            .entry(name.to_string())
            .or_insert_with(|| ResourceRecord::new(name, resource_type, input_hash));
        record.resource_type = resource_type.to_string();
        record.input_hash = input_hash.to_string();
        record.status = ResourceStatus::Failed;
        record.error = Some(error.to_string());
        record.updated_at = now;
        self.last_updated = now;
    }

    /// Adds a history entry, dropping the oldest beyond [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns all resource names.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Returns true if no run has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.history.is_empty()
    }
}

impl ResourceRecord {
    /// Creates a record with no outcome yet.
    #[must_use]
    pub fn new(name: &str, resource_type: &str, input_hash: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            resource_type: resource_type.to_string(),
            input_hash: input_hash.to_string(),
            status: ResourceStatus::Failed,
            outputs: Outputs::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks if the last attempt succeeded.
    #[must_use]
    pub const fn is_provisioned(&self) -> bool {
        matches!(self.status, ResourceStatus::Provisioned)
    }
}

impl RunHistoryEntry {
    /// Creates a new history entry.
    #[must_use]
    pub fn new(operation: RunOperation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: RunOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Provisioned => "provisioned",
            Self::Failed => "failed",
        };
        write!(f, "{status}")
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Create => "create",
            Self::Update => "update",
        };
        write!(f, "{op}")
    }
}
