//! Reference resolution for descriptor inputs.
//!
//! Scans inputs for output references, including references nested in lists,
//! maps and computed dependencies, to find what a resource depends on.

use std::collections::HashSet;

use crate::error::GraphError;

use super::descriptor::ResourceDescriptor;
use super::input::{InputValue, OutputRef};

/// An output reference found in one input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Top-level input field holding the reference.
    pub field: String,
    /// The referenced output.
    pub target: OutputRef,
}

/// A configuration key an input reads at execution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRequirement {
    /// Top-level input field reading the key.
    pub field: String,
    /// Configuration key.
    pub key: String,
    /// Whether the key names a secret.
    pub secret: bool,
    /// Whether a fallback value is declared.
    pub has_default: bool,
}

/// Extracts dependency information from descriptors.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceResolver;

impl ReferenceResolver {
    /// Creates a new resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Lists every output reference in a descriptor's inputs, in declaration
    /// order, without duplicates.
    #[must_use]
    pub fn references(&self, descriptor: &ResourceDescriptor) -> Vec<Reference> {
        let mut found = Vec::new();
        for (field, value) in descriptor.inputs() {
            for target in output_refs(value) {
                let reference = Reference {
                    field: field.clone(),
                    target,
                };
                if !found.contains(&reference) {
                    found.push(reference);
                }
            }
        }
        found
    }

    /// Lists references and checks that every target resource is known.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnresolvedReference`] for the first reference
    /// naming a resource outside `known`.
    pub fn resolve(
        &self,
        descriptor: &ResourceDescriptor,
        known: &HashSet<&str>,
    ) -> Result<Vec<Reference>, GraphError> {
        let references = self.references(descriptor);
        if let Some(bad) = references
            .iter()
            .find(|r| !known.contains(r.target.resource.as_str()))
        {
            return Err(GraphError::UnresolvedReference {
                resource: descriptor.name().to_string(),
                field: bad.field.clone(),
                target: bad.target.resource.clone(),
            });
        }
        Ok(references)
    }

    /// Names of the resources a descriptor depends on, in first-seen order.
    #[must_use]
    pub fn dependencies(&self, descriptor: &ResourceDescriptor) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for reference in self.references(descriptor) {
            if !names.contains(&reference.target.resource) {
                names.push(reference.target.resource);
            }
        }
        names
    }

    /// Lists the configuration keys and secrets a descriptor reads.
    #[must_use]
    pub fn config_requirements(&self, descriptor: &ResourceDescriptor) -> Vec<ConfigRequirement> {
        let mut found = Vec::new();
        for (field, value) in descriptor.inputs() {
            value.walk(&mut |node: &InputValue| match node {
                InputValue::Config { key, default } => found.push(ConfigRequirement {
                    field: field.clone(),
                    key: key.clone(),
                    secret: false,
                    has_default: default.is_some(),
                }),
                InputValue::Secret(key) => found.push(ConfigRequirement {
                    field: field.clone(),
                    key: key.clone(),
                    secret: true,
                    has_default: false,
                }),
                _ => {}
            });
        }
        found
    }
}

/// Lists the output references inside a single input value, without duplicates.
#[must_use]
pub fn output_refs(value: &InputValue) -> Vec<OutputRef> {
    let mut found: Vec<OutputRef> = Vec::new();
    value.walk(&mut |node: &InputValue| {
        if let InputValue::OutputRef(reference) = node
            && !found.contains(reference)
        {
            found.push(reference.clone());
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_image() -> ResourceDescriptor {
        ResourceDescriptor::new("docker:Image", "backstageImage")
            .with_input(
                "imageName",
                InputValue::interpolate("${registry.loginServer}/backstage").unwrap(),
            )
            .with_input(
                "registry",
                InputValue::Map(vec![
                    (String::from("server"), InputValue::output("registry", "loginServer")),
                    (String::from("username"), InputValue::output("principal", "applicationId")),
                    (String::from("password"), InputValue::output("appPassword", "value")),
                ]),
            )
            .with_input("build", InputValue::literal(json!({ "platform": "linux/amd64" })))
    }

    #[test]
    fn test_references_walk_nested_values() {
        let resolver = ReferenceResolver::new();
        let refs = resolver.references(&registry_image());

        let listed: Vec<(String, String)> = refs
            .iter()
            .map(|r| (r.field.clone(), r.target.to_string()))
            .collect();
        assert_eq!(
            listed,
            vec![
                (String::from("imageName"), String::from("registry.loginServer")),
                (String::from("registry"), String::from("registry.loginServer")),
                (String::from("registry"), String::from("principal.applicationId")),
                (String::from("registry"), String::from("appPassword.value")),
            ]
        );
    }

    #[test]
    fn test_dependencies_are_unique_and_ordered() {
        let resolver = ReferenceResolver::new();
        assert_eq!(
            resolver.dependencies(&registry_image()),
            vec!["registry", "principal", "appPassword"]
        );
    }

    #[test]
    fn test_resolve_reports_unknown_target() {
        let resolver = ReferenceResolver::new();
        let known: HashSet<&str> = ["registry", "principal"].into_iter().collect();

        let err = resolver.resolve(&registry_image(), &known).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnresolvedReference {
                resource: String::from("backstageImage"),
                field: String::from("registry"),
                target: String::from("appPassword"),
            }
        );
    }

    #[test]
    fn test_config_requirements() {
        let descriptor = ResourceDescriptor::new("azure-native:web:WebApp", "webApp")
            .with_input("org", InputValue::config("azureDevOpsOrganization", Some(json!("dirien"))))
            .with_input(
                "settings",
                InputValue::List(vec![InputValue::secret("azureDevOpsToken")]),
            );

        let reqs = ReferenceResolver::new().config_requirements(&descriptor);
        assert_eq!(reqs.len(), 2);
        assert!(!reqs[0].secret && reqs[0].has_default);
        assert_eq!(reqs[1].key, "azureDevOpsToken");
        assert!(reqs[1].secret);
        assert_eq!(reqs[1].field, "settings");
    }
}
