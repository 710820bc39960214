//! Stack file types.
//!
//! This module defines the structs that map to `stackgraph.yaml`: the project
//! identity, run settings, engine and state locations, plain config values,
//! the resources to provision and the stack exports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::DEFAULT_ENGINE_TIMEOUT_SECS;
use crate::error::ConfigError;
use crate::planner::{DEFAULT_RESOURCE_TIMEOUT_SECS, ExecutionOptions};
use crate::resource::{InputValue, ResourceDescriptor};

use super::inputs::{parse_input, parse_inputs};

/// Default directory holding the run record.
pub const DEFAULT_STATE_DIR: &str = ".stackgraph";

/// Label used for export inputs in error messages.
pub const EXPORTS_LABEL: &str = "outputs";

/// The root structure of a stack file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Project identity.
    pub project: ProjectConfig,
    /// Run settings.
    #[serde(default)]
    pub settings: SettingsConfig,
    /// Provisioning engine connection.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Run record location.
    #[serde(default)]
    pub state: StateConfig,
    /// Plain configuration values, readable through `{ config: key }`.
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Resources in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Stack exports: name -> input form.
    #[serde(default)]
    pub outputs: serde_yaml::Mapping,
}

/// Project identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Project name.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
}

/// Run settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettingsConfig {
    /// Default provisioning timeout per resource, in seconds.
    #[serde(default = "default_resource_timeout")]
    pub resource_timeout_secs: u64,
    /// Maximum concurrent provisioning calls within a batch.
    #[serde(default)]
    pub max_parallel: Option<usize>,
    /// Keep provisioning independent resources after a failure.
    #[serde(default)]
    pub continue_on_error: bool,
}

/// Provisioning engine connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Engine base URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_engine_timeout")]
    pub timeout_secs: u64,
}

/// Run record location.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Directory holding `state.json`, relative to the stack file.
    #[serde(default)]
    pub path: Option<String>,
}

/// One declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Logical name, unique within the stack.
    pub name: String,
    /// Provider resource kind.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Inputs: field -> input form.
    #[serde(default)]
    pub inputs: serde_yaml::Mapping,
    /// Per-resource provisioning timeout, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_environment() -> String {
    String::from("dev")
}

const fn default_resource_timeout() -> u64 {
    DEFAULT_RESOURCE_TIMEOUT_SECS
}

const fn default_engine_timeout() -> u64 {
    DEFAULT_ENGINE_TIMEOUT_SECS
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            resource_timeout_secs: DEFAULT_RESOURCE_TIMEOUT_SECS,
            max_parallel: None,
            continue_on_error: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: DEFAULT_ENGINE_TIMEOUT_SECS,
        }
    }
}

impl SettingsConfig {
    /// Run options derived from these settings.
    #[must_use]
    pub const fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            resource_timeout: Duration::from_secs(self.resource_timeout_secs),
            max_parallel: self.max_parallel,
            continue_on_error: self.continue_on_error,
        }
    }
}

impl StateConfig {
    /// Directory holding the run record, resolved against `base`.
    #[must_use]
    pub fn dir(&self, base: &std::path::Path) -> PathBuf {
        base.join(self.path.as_deref().unwrap_or(DEFAULT_STATE_DIR))
    }
}

impl ResourceConfig {
    /// Converts this entry into a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidInput`] if an input form is malformed.
    pub fn descriptor(&self) -> Result<ResourceDescriptor, ConfigError> {
        let mut descriptor = ResourceDescriptor::new(self.resource_type.as_str(), self.name.as_str());
        for (field, value) in parse_inputs(&self.name, &self.inputs)? {
            descriptor = descriptor.with_input(field, value);
        }
        if let Some(secs) = self.timeout_secs {
            descriptor = descriptor.with_timeout(Duration::from_secs(secs));
        }
        Ok(descriptor)
    }
}

impl StackConfig {
    /// Converts every resource into a descriptor, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns the first malformed input.
    pub fn descriptors(&self) -> Result<Vec<ResourceDescriptor>, ConfigError> {
        self.resources.iter().map(ResourceConfig::descriptor).collect()
    }

    /// Parses the stack exports, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns the first malformed export.
    pub fn exports(&self) -> Result<Vec<(String, InputValue)>, ConfigError> {
        parse_inputs(EXPORTS_LABEL, &self.outputs)
    }

    /// Parses a single export by name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidInput`] if the export is malformed.
    pub fn export(&self, name: &str) -> Result<Option<InputValue>, ConfigError> {
        self.outputs
            .get(name)
            .map(|value| parse_input(EXPORTS_LABEL, name, value))
            .transpose()
    }

    /// Looks up a resource entry by name.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK: &str = r#"
project:
  name: backstage
settings:
  max_parallel: 4
config:
  location: westeurope
resources:
  - name: resourceGroup
    type: azure-native:resources:ResourceGroup
    inputs:
      location: { config: location }
  - name: registry
    type: azure-native:containerregistry:Registry
    timeout_secs: 120
    inputs:
      resourceGroupName: { ref: resourceGroup.name }
      sku: { name: Basic }
outputs:
  loginServer: { ref: registry.loginServer }
"#;

    #[test]
    fn test_defaults_applied() {
        let config: StackConfig = serde_yaml::from_str(STACK).unwrap();
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.settings.resource_timeout_secs, DEFAULT_RESOURCE_TIMEOUT_SECS);
        assert!(!config.settings.continue_on_error);
        assert_eq!(config.engine.timeout_secs, DEFAULT_ENGINE_TIMEOUT_SECS);
        assert_eq!(
            config.state.dir(std::path::Path::new("/work")),
            PathBuf::from("/work/.stackgraph")
        );
    }

    #[test]
    fn test_descriptors_keep_order_and_timeout() {
        let config: StackConfig = serde_yaml::from_str(STACK).unwrap();
        let descriptors = config.descriptors().unwrap();

        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].name(), "resourceGroup");
        assert_eq!(descriptors[1].timeout(), Some(Duration::from_secs(120)));
        assert!(matches!(
            descriptors[1].input("resourceGroupName"),
            Some(InputValue::OutputRef(r)) if r.resource == "resourceGroup" && r.field == "name"
        ));
        assert!(descriptors[1].input("sku").is_some_and(InputValue::is_literal));
    }

    #[test]
    fn test_exports_and_options() {
        let config: StackConfig = serde_yaml::from_str(STACK).unwrap();

        let exports = config.exports().unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].0, "loginServer");
        assert!(config.export("loginServer").unwrap().is_some());
        assert!(config.export("nope").unwrap().is_none());

        let options = config.settings.execution_options();
        assert_eq!(options.max_parallel, Some(4));
        assert_eq!(options.resource_timeout, Duration::from_secs(600));
    }
}
