//! Hashing for change detection.
//!
//! Hashes are deterministic: map entries are sorted before hashing, and
//! secrets contribute only their key, never their value.

use sha2::{Digest, Sha256};

use crate::resource::{InputValue, ResourceDescriptor};

use super::spec::StackConfig;

/// Hasher for stacks and descriptors.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the whole stack file.
    #[must_use]
    pub fn hash_stack(&self, config: &StackConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update(config.project.environment.as_bytes());

        // BTreeMap iterates sorted
        for (key, value) in &config.config {
            hasher.update(key.as_bytes());
            hasher.update(value.as_bytes());
        }

        for resource in &config.resources {
            hasher.update(resource.name.as_bytes());
            hasher.update(resource.resource_type.as_bytes());
            hasher.update(serde_json::to_vec(&resource.inputs).unwrap_or_default());
            if let Some(secs) = resource.timeout_secs {
                hasher.update(secs.to_be_bytes());
            }
        }

        hasher.update(serde_json::to_vec(&config.outputs).unwrap_or_default());

        hex::encode(hasher.finalize())
    }

    /// Computes a hash of one descriptor's type and inputs.
    ///
    /// The hash changes when the type, an input's literal value or an input's
    /// wiring changes. It does not depend on the values references resolve to.
    #[must_use]
    pub fn hash_descriptor(&self, descriptor: &ResourceDescriptor) -> String {
        let mut hasher = Sha256::new();

        hasher.update(descriptor.name().as_bytes());
        hasher.update(descriptor.resource_type().as_str().as_bytes());

        let mut inputs: Vec<_> = descriptor.inputs().iter().collect();
        inputs.sort_by(|a, b| a.0.cmp(&b.0));
        for (field, value) in inputs {
            hasher.update(field.as_bytes());
            hasher.update(canonical(value).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        hash.get(..8).unwrap_or(hash)
    }

    /// Checks if two hashes match.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        hash1 == hash2
    }
}

/// Order-independent textual form of an input value.
fn canonical(value: &InputValue) -> String {
    match value {
        InputValue::Map(entries) => {
            let mut parts: Vec<String> = entries
                .iter()
                .map(|(key, item)| format!("{key}={}", canonical(item)))
                .collect();
            parts.sort_unstable();
            format!("map{{{}}}", parts.join(","))
        }
        InputValue::List(items) => {
            let parts: Vec<String> = items.iter().map(canonical).collect();
            format!("list[{}]", parts.join(","))
        }
        InputValue::Computed(computed) => {
            let parts: Vec<String> = computed.deps().iter().map(canonical).collect();
            format!("computed:{}({})", computed.label(), parts.join(","))
        }
        InputValue::Config { key, default } => match default {
            Some(fallback) => format!("config:{key}|{fallback}"),
            None => format!("config:{key}"),
        },
        // serde_json objects are sorted maps
        InputValue::Literal(_) | InputValue::OutputRef(_) | InputValue::Secret(_) => {
            value.to_string()
        }
    }
}
