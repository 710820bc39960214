//! Error types for the stackgraph system.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, graph construction, output resolution, provisioning,
//! and run-record persistence.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for stackgraph.
#[derive(Debug, Error)]
pub enum StackError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Graph construction errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Output store errors.
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    /// Provisioning errors reported by or about the engine.
    #[error("Provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The stack file was not found.
    #[error("Stack file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The stack file could not be parsed.
    #[error("Failed to parse stack file: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Stack validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A required configuration value or secret is not set.
    #[error("Required config missing: {key}")]
    MissingValue {
        /// Configuration key.
        key: String,
    },

    /// An input declaration could not be understood.
    #[error("Invalid input '{field}' on resource '{resource}': {message}")]
    InvalidInput {
        /// Resource declaring the input.
        resource: String,
        /// Input field name.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A sensitive field was given a plaintext literal.
    #[error("Input '{field}' on resource '{resource}' looks like a secret; use {{ secret: <key> }} instead of a literal")]
    LiteralSecret {
        /// Resource declaring the input.
        resource: String,
        /// Input field name.
        field: String,
    },
}

/// Errors raised while assembling the dependency graph.
///
/// All of these are fatal and reported before any provisioning starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Two descriptors share a logical name.
    #[error("Duplicate resource name: {name}")]
    DuplicateResource {
        /// The duplicated name.
        name: String,
    },

    /// An input references a resource that is not declared.
    #[error("Resource '{resource}' input '{field}' references unknown resource '{target}'")]
    UnresolvedReference {
        /// Resource declaring the reference.
        resource: String,
        /// Input field holding the reference.
        field: String,
        /// Name that could not be resolved.
        target: String,
    },

    /// The references form a cycle.
    #[error("Cyclic dependency detected: {}", format_cycle(.cycle))]
    CyclicDependency {
        /// Members of the cycle in traversal order.
        cycle: Vec<String>,
    },
}

/// Output store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutputError {
    /// A key was written twice with different values.
    #[error("Output '{resource}.{field}' was already written with a different value")]
    DuplicateOutput {
        /// Owning resource.
        resource: String,
        /// Output field.
        field: String,
    },

    /// The resource owning the key failed or was never provisioned.
    #[error("Upstream resource '{resource}' failed")]
    UpstreamFailure {
        /// The resource whose output is unavailable.
        resource: String,
    },

    /// The resource succeeded but did not report this field.
    #[error("Resource '{resource}' has no output named '{field}'")]
    MissingOutput {
        /// Owning resource.
        resource: String,
        /// Output field.
        field: String,
    },

    /// The resource is not part of this run.
    #[error("Unknown resource '{resource}'")]
    UnknownResource {
        /// Requested resource.
        resource: String,
    },

    /// A derived input could not be computed.
    #[error("Failed to compute '{label}': {message}")]
    ComputeFailed {
        /// Label of the computation.
        label: String,
        /// Description of the failure.
        message: String,
    },
}

/// Provisioning errors.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The engine reported that provisioning failed.
    #[error("Engine failed to provision '{resource}': {message}")]
    Failed {
        /// Resource being provisioned.
        resource: String,
        /// Engine message.
        message: String,
    },

    /// Provisioning did not finish in time.
    #[error("Timed out provisioning '{resource}' after {timeout_secs}s")]
    Timeout {
        /// Resource being provisioned.
        resource: String,
        /// Timeout that was exceeded.
        timeout_secs: u64,
    },

    /// Engine rejected the credentials.
    #[error("Engine authentication failed: {message}")]
    Unauthorized {
        /// Description of the auth failure.
        message: String,
    },

    /// Engine answered with a non-success status.
    #[error("Engine request failed: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Body or message returned by the engine.
        message: String,
    },

    /// The engine could not be reached.
    #[error("Network error communicating with engine: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// The engine answered with something unreadable.
    #[error("Invalid response from engine: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// The run was aborted before this resource was provisioned.
    #[error("Run aborted before '{resource}' was provisioned")]
    Aborted {
        /// Resource left unprovisioned.
        resource: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Result type alias for stackgraph operations.
pub type Result<T> = std::result::Result<T, StackError>;

fn format_cycle(cycle: &[String]) -> String {
    match cycle.first() {
        Some(first) => format!("{} -> {first}", cycle.join(" -> ")),
        None => String::new(),
    }
}

impl StackError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error was raised while building the graph,
    /// before any provisioning could start.
    #[must_use]
    pub const fn is_graph_error(&self) -> bool {
        matches!(self, Self::Graph(_))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates an invalid input error.
    #[must_use]
    pub fn invalid_input(
        resource: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidInput {
            resource: resource.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

impl ProvisionError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates an engine failure for a resource.
    #[must_use]
    pub fn failed(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            resource: resource.into(),
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_closes_loop() {
        let err = GraphError::CyclicDependency {
            cycle: vec![String::from("a"), String::from("b")],
        };
        assert_eq!(err.to_string(), "Cyclic dependency detected: a -> b -> a");
    }

    #[test]
    fn test_graph_errors_flagged() {
        let err: StackError = GraphError::DuplicateResource {
            name: String::from("rg"),
        }
        .into();
        assert!(err.is_graph_error());

        let err: StackError = ProvisionError::network("down").into();
        assert!(!err.is_graph_error());
    }
}
