//! Resource descriptors.
//!
//! A descriptor is the immutable declaration of one infrastructure object
//! before it is provisioned.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::input::InputValue;

/// Provider resource kind, e.g. `azure-native:resources:ResourceGroup`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(String);

/// Declaration of one resource: type, logical name and inputs.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    resource_type: ResourceType,
    name: String,
    inputs: Vec<(String, InputValue)>,
    timeout: Option<Duration>,
}

impl ResourceType {
    /// Creates a resource type from its provider token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the provider token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ResourceDescriptor {
    /// Creates a descriptor with no inputs.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: ResourceType::new(resource_type),
            name: name.into(),
            inputs: Vec::new(),
            timeout: None,
        }
    }

    /// Adds an input, replacing any earlier input with the same field name
    /// while keeping its original position.
    #[must_use]
    pub fn with_input(mut self, field: impl Into<String>, value: InputValue) -> Self {
        let field = field.into();
        if let Some(slot) = self.inputs.iter_mut().find(|(f, _)| *f == field) {
            slot.1 = value;
        } else {
            self.inputs.push((field, value));
        }
        self
    }

    /// Sets a provisioning timeout for this resource only.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Logical name, unique within a run.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provider resource kind.
    #[must_use]
    pub const fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    /// Inputs in declaration order.
    #[must_use]
    pub fn inputs(&self) -> &[(String, InputValue)] {
        &self.inputs
    }

    /// Looks up one input by field name.
    #[must_use]
    pub fn input(&self, field: &str) -> Option<&InputValue> {
        self.inputs.iter().find(|(f, _)| f == field).map(|(_, v)| v)
    }

    /// Per-resource timeout override.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_with_input_keeps_declaration_order() {
        let descriptor = ResourceDescriptor::new("azure-native:web:WebApp", "webApp")
            .with_input("kind", InputValue::literal("app,linux,container"))
            .with_input("serverFarmId", InputValue::output("plan", "id"))
            .with_input("kind", InputValue::literal("app"));

        let fields: Vec<&str> = descriptor.inputs().iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(fields, vec!["kind", "serverFarmId"]);
        assert!(matches!(
            descriptor.input("kind"),
            Some(InputValue::Literal(v)) if *v == json!("app")
        ));
    }

    #[test]
    fn test_display() {
        let descriptor = ResourceDescriptor::new("azure-native:resources:ResourceGroup", "rg");
        assert_eq!(descriptor.to_string(), "rg (azure-native:resources:ResourceGroup)");
        assert_eq!(descriptor.resource_type().as_str(), "azure-native:resources:ResourceGroup");
        assert!(descriptor.timeout().is_none());
    }
}
