//! Stack validation.
//!
//! Checks a parsed stack before anything is planned: names, settings, the
//! engine endpoint, input forms, reference targets, and plaintext secrets.

use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

use crate::error::{ConfigError, Result, StackError};
use crate::resource::{InputValue, ReferenceResolver, ResourceDescriptor, output_refs};

use super::spec::{EXPORTS_LABEL, ProjectConfig, SettingsConfig, StackConfig};

/// Field-name fragments that mark an input as sensitive.
const SENSITIVE_MARKERS: &[&str] = &[
    "password",
    "secret",
    "token",
    "apikey",
    "credential",
    "privatekey",
    "connectionstring",
];

/// Validator for stacks.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Keys known to be supplied outside the stack file.
    external_keys: HashSet<String>,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a config key as supplied externally, e.g. by the environment,
    /// so a missing value is not reported.
    pub fn add_external_key(&mut self, key: impl Into<String>) {
        self.external_keys.insert(key.into());
    }

    /// Validates a stack.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any check fails.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Stack validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(StackError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Runs every check and collects all findings.
    #[must_use]
    pub fn check(&self, config: &StackConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        Self::validate_settings(&config.settings, &mut result);
        Self::validate_engine(config, &mut result);

        let descriptors = Self::validate_resources(config, &mut result);
        let known: HashSet<&str> = config.resources.iter().map(|r| r.name.as_str()).collect();
        Self::validate_references(&descriptors, &known, &mut result);
        for descriptor in &descriptors {
            Self::validate_secrets(descriptor, &mut result);
        }
        self.validate_config_keys(config, &descriptors, &mut result);
        Self::validate_exports(config, &known, &mut result);

        result
    }

    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        if project.name.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: String::from("Project name cannot be empty"),
            });
        } else if !is_valid_name(&project.name) {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            });
        }

        if project.environment.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.environment"),
                message: String::from("Environment cannot be empty"),
            });
        } else if !is_valid_name(&project.environment) {
            result.errors.push(ValidationError {
                field: String::from("project.environment"),
                message: format!("Environment '{}' is invalid", project.environment),
            });
        }
    }

    fn validate_settings(settings: &SettingsConfig, result: &mut ValidationResult) {
        if settings.resource_timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("settings.resource_timeout_secs"),
                message: String::from("Resource timeout must be greater than zero"),
            });
        }

        if settings.max_parallel == Some(0) {
            result.errors.push(ValidationError {
                field: String::from("settings.max_parallel"),
                message: String::from("max_parallel must be at least 1"),
            });
        }
    }

    fn validate_engine(config: &StackConfig, result: &mut ValidationResult) {
        match config.engine.endpoint.as_deref() {
            None => result
                .warnings
                .push(String::from("engine.endpoint is not set; apply will fail until it is")),
            Some(endpoint) if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") => {
                result.errors.push(ValidationError {
                    field: String::from("engine.endpoint"),
                    message: format!("Engine endpoint '{endpoint}' must start with http:// or https://"),
                });
            }
            Some(endpoint) if endpoint.starts_with("http://") => result
                .warnings
                .push(format!("Engine endpoint '{endpoint}' is not using TLS")),
            Some(_) => {}
        }

        if config.engine.timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("engine.timeout_secs"),
                message: String::from("Engine timeout must be greater than zero"),
            });
        }
    }

    /// Checks names and types, and converts entries to descriptors. Entries
    /// with malformed inputs are reported and left out.
    fn validate_resources(config: &StackConfig, result: &mut ValidationResult) -> Vec<ResourceDescriptor> {
        if config.resources.is_empty() {
            result.warnings.push(String::from("Stack declares no resources"));
        }

        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(config.resources.len());

        for (i, resource) in config.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if resource.name.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: String::from("Resource name cannot be empty"),
                });
            } else if !is_valid_resource_name(&resource.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!(
                        "Resource name '{}' is invalid. Must start with a letter and contain only letters, digits, '-' or '_'.",
                        resource.name
                    ),
                });
            } else if !seen.insert(resource.name.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!("Duplicate resource name: {}", resource.name),
                });
            }

            if resource.resource_type.trim().is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.type"),
                    message: format!("Resource '{}' has no type", resource.name),
                });
            }

            if resource.timeout_secs == Some(0) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.timeout_secs"),
                    message: String::from("Timeout must be greater than zero"),
                });
            }

            match resource.descriptor() {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => result.errors.push(ValidationError {
                    field: format!("{prefix}.inputs"),
                    message: e.to_string(),
                }),
            }
        }

        descriptors
    }

    fn validate_references(
        descriptors: &[ResourceDescriptor],
        known: &HashSet<&str>,
        result: &mut ValidationResult,
    ) {
        let resolver = ReferenceResolver::new();
        for descriptor in descriptors {
            for reference in resolver.references(descriptor) {
                if !known.contains(reference.target.resource.as_str()) {
                    result.errors.push(ValidationError {
                        field: format!("{}.{}", descriptor.name(), reference.field),
                        message: format!(
                            "References unknown resource '{}'",
                            reference.target.resource
                        ),
                    });
                }
            }
        }
    }

    fn validate_secrets(descriptor: &ResourceDescriptor, result: &mut ValidationResult) {
        for (field, value) in descriptor.inputs() {
            for path in literal_secrets(field, value) {
                let err = ConfigError::LiteralSecret {
                    resource: descriptor.name().to_string(),
                    field: path.clone(),
                };
                result.errors.push(ValidationError {
                    field: format!("{}.{path}", descriptor.name()),
                    message: err.to_string(),
                });
            }
        }
    }

    fn validate_config_keys(
        &self,
        config: &StackConfig,
        descriptors: &[ResourceDescriptor],
        result: &mut ValidationResult,
    ) {
        let resolver = ReferenceResolver::new();
        let mut reported = BTreeSet::new();

        for descriptor in descriptors {
            for requirement in resolver.config_requirements(descriptor) {
                if requirement.secret
                    || requirement.has_default
                    || config.config.contains_key(&requirement.key)
                    || self.external_keys.contains(&requirement.key)
                {
                    continue;
                }
                if reported.insert(requirement.key.clone()) {
                    result.warnings.push(format!(
                        "Config key '{}' (used by {}.{}) has no value or default in the stack file",
                        requirement.key,
                        descriptor.name(),
                        requirement.field
                    ));
                }
            }
        }
    }

    fn validate_exports(config: &StackConfig, known: &HashSet<&str>, result: &mut ValidationResult) {
        for (key, value) in &config.outputs {
            let name = key.as_str().unwrap_or_default();
            let field = format!("{EXPORTS_LABEL}.{name}");
            match super::inputs::parse_input(EXPORTS_LABEL, name, value) {
                Ok(export) => {
                    for target in output_refs(&export) {
                        if !known.contains(target.resource.as_str()) {
                            result.errors.push(ValidationError {
                                field: field.clone(),
                                message: format!("Export references unknown resource '{}'", target.resource),
                            });
                        }
                    }
                    if export.contains_secret() {
                        result.warnings.push(format!("Export '{name}' exposes a secret"));
                    }
                }
                Err(e) => result.errors.push(ValidationError {
                    field,
                    message: e.to_string(),
                }),
            }
        }
    }
}

/// Returns true if a field name looks like it holds a credential.
#[must_use]
pub fn is_sensitive_name(name: &str) -> bool {
    let normalized: String = name
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    SENSITIVE_MARKERS.iter().any(|m| normalized.contains(m))
}

/// Lists the paths inside `value` where a sensitive field holds a plaintext
/// string.
///
/// Covers `password: "..."` style fields at any depth and the
/// `{ name: DB_PASSWORD, value: "..." }` pairs used for app settings.
#[must_use]
pub fn literal_secrets(field: &str, value: &InputValue) -> Vec<String> {
    let mut found = Vec::new();
    scan_input(field, value, &mut found);
    found
}

fn scan_input(path: &str, value: &InputValue, found: &mut Vec<String>) {
    match value {
        InputValue::Literal(literal) => scan_literal(path, literal, found),
        InputValue::List(items) => {
            for (i, item) in items.iter().enumerate() {
                scan_input(&format!("{path}[{i}]"), item, found);
            }
        }
        InputValue::Map(entries) => {
            let named = entries.iter().find_map(|(k, v)| match (k.as_str(), v) {
                ("name", InputValue::Literal(Value::String(n))) => Some(n.as_str()),
                _ => None,
            });
            for (key, item) in entries {
                let child = format!("{path}.{key}");
                let sensitive = is_sensitive_name(key)
                    || (key == "value" && named.is_some_and(is_sensitive_name));
                if sensitive && is_plain_string(item) {
                    found.push(child);
                } else {
                    scan_input(&child, item, found);
                }
            }
        }
        InputValue::OutputRef(_)
        | InputValue::Computed(_)
        | InputValue::Config { .. }
        | InputValue::Secret(_) => {}
    }

    if is_sensitive_name(leaf(path)) && is_plain_string(value) && !found.iter().any(|f| f == path) {
        found.push(path.to_string());
    }
}

fn scan_literal(path: &str, value: &Value, found: &mut Vec<String>) {
    match value {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                scan_literal(&format!("{path}[{i}]"), item, found);
            }
        }
        Value::Object(map) => {
            let named = map.get("name").and_then(Value::as_str);
            for (key, item) in map {
                let child = format!("{path}.{key}");
                let sensitive = is_sensitive_name(key)
                    || (key == "value" && named.is_some_and(is_sensitive_name));
                if sensitive && matches!(item, Value::String(s) if !s.is_empty()) {
                    found.push(child);
                } else {
                    scan_literal(&child, item, found);
                }
            }
        }
        _ => {}
    }
}

fn is_plain_string(value: &InputValue) -> bool {
    matches!(value, InputValue::Literal(Value::String(s)) if !s.is_empty())
}

/// Last segment of a path, without any index suffix.
fn leaf(path: &str) -> &str {
    let last = path.rsplit('.').next().unwrap_or(path);
    last.split('[').next().unwrap_or(last)
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let mut chars = name.chars();

    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase()
    {
        return false;
    }

    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return false;
        }
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Resource names are identifiers: camelCase is allowed, dots are not, since
/// they separate the resource from the field in references.
fn is_valid_resource_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn stack(yaml: &str) -> StackConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    const VALID: &str = r#"
project:
  name: backstage
engine:
  endpoint: https://engine.example.com
config:
  location: westeurope
resources:
  - name: resourceGroup
    type: azure-native:resources:ResourceGroup
    inputs:
      location: { config: location }
  - name: postgres
    type: azure-native:dbforpostgresql:Server
    inputs:
      resourceGroupName: { ref: resourceGroup.name }
      administratorLogin: backstage
      administratorLoginPassword: { secret: dbPassword }
outputs:
  dbHost: { ref: postgres.fullyQualifiedDomainName }
"#;

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("backstage-dev"));
        assert!(is_valid_name("my-stack-123"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Stack")); // uppercase
        assert!(!is_valid_name("123-stack")); // starts with number
        assert!(!is_valid_name("stack_x")); // underscore
        assert!(!is_valid_name("stack-")); // ends with hyphen
        assert!(!is_valid_name("stack--x")); // consecutive hyphens
    }

    #[test]
    fn test_resource_names() {
        assert!(is_valid_resource_name("appServicePlan"));
        assert!(is_valid_resource_name("acr-pull_role"));
        assert!(!is_valid_resource_name("web.app"));
        assert!(!is_valid_resource_name("1app"));
    }

    #[test]
    fn test_sensitive_names() {
        assert!(is_sensitive_name("administratorLoginPassword"));
        assert!(is_sensitive_name("AZURE_DEVOPS_TOKEN"));
        assert!(is_sensitive_name("client-secret"));
        assert!(is_sensitive_name("apiKey"));
        assert!(!is_sensitive_name("administratorLogin"));
        assert!(!is_sensitive_name("location"));
    }

    #[test]
    fn test_valid_stack_passes() {
        let result = ConfigValidator::new().validate(&stack(VALID)).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_literal_password_rejected() {
        let yaml = VALID.replace("{ secret: dbPassword }", "hunter2");
        let result = ConfigValidator::new().check(&stack(&yaml));

        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "postgres.administratorLoginPassword");
    }

    #[test]
    fn test_app_setting_pair_with_literal_secret_rejected() {
        let yaml = r#"
project:
  name: backstage
engine:
  endpoint: https://engine.example.com
resources:
  - name: webApp
    type: azure-native:web:WebApp
    inputs:
      siteConfig:
        appSettings:
          - name: POSTGRES_HOST
            value: db.example.com
          - name: POSTGRES_PASSWORD
            value: hunter2
          - name: AZURE_TOKEN
            value: { secret: azureDevOpsToken }
"#;
        let result = ConfigValidator::new().check(&stack(yaml));
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["webApp.siteConfig.appSettings[1].value"]);
    }

    #[test]
    fn test_unknown_reference_and_export_reported() {
        let yaml = VALID
            .replace("{ ref: resourceGroup.name }", "{ ref: rg.name }")
            .replace("postgres.fullyQualifiedDomainName", "db.host");
        let result = ConfigValidator::new().check(&stack(&yaml));

        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["postgres.resourceGroupName", "outputs.dbHost"]);
    }

    #[test]
    fn test_duplicate_and_settings_errors() {
        let yaml = r"
project:
  name: backstage
settings:
  max_parallel: 0
engine:
  endpoint: ftp://engine
resources:
  - name: rg
    type: azure-native:resources:ResourceGroup
  - name: rg
    type: ''
";
        let result = ConfigValidator::new().check(&stack(yaml));
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"settings.max_parallel"));
        assert!(fields.contains(&"engine.endpoint"));
        assert!(fields.contains(&"resources[1].name"));
        assert!(fields.contains(&"resources[1].type"));
        assert!(ConfigValidator::new().validate(&stack(yaml)).is_err());
    }

    #[test]
    fn test_missing_config_key_warns() {
        let yaml = VALID.replace("config:\n  location: westeurope\n", "");
        let result = ConfigValidator::new().check(&stack(&yaml));
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);

        let mut validator = ConfigValidator::new();
        validator.add_external_key("location");
        assert_eq!(validator.check(&stack(&yaml)).warning_count(), 0);
    }
}
