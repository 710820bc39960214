//! Input values attached to resource descriptors.
//!
//! An input is either a concrete literal or something deferred: a reference
//! to another resource's output, a value computed from such references, or a
//! configuration/secret lookup performed at execution time.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::{OutputError, Result, StackError};

/// Signature of the pure function behind a [`Computed`] input.
pub type ComputeFn = Arc<dyn Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync>;

/// A reference to one output field of another resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    /// Logical name of the referenced resource.
    pub resource: String,
    /// Output field on that resource.
    pub field: String,
}

/// A value derived from other inputs once they all resolve.
#[derive(Clone)]
pub struct Computed {
    label: String,
    deps: Vec<InputValue>,
    func: ComputeFn,
}

/// The value bound to one input field of a descriptor.
#[derive(Debug, Clone)]
pub enum InputValue {
    /// A concrete value with no deferred parts.
    Literal(Value),
    /// A list whose items may be deferred.
    List(Vec<InputValue>),
    /// A map whose entries may be deferred, in declaration order.
    Map(Vec<(String, InputValue)>),
    /// Another resource's output.
    OutputRef(OutputRef),
    /// A value derived from other inputs.
    Computed(Computed),
    /// A non-secret configuration value, with an optional fallback.
    Config {
        /// Configuration key.
        key: String,
        /// Value used when the key is not set.
        default: Option<Value>,
    },
    /// A secret read through the configuration capability.
    Secret(String),
}

/// Source of the values needed to evaluate deferred inputs.
pub trait ValueLookup {
    /// Returns the resolved value of an output reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the output is unavailable.
    fn output(&self, reference: &OutputRef) -> Result<Value>;

    /// Returns a configuration value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not set.
    fn config(&self, key: &str) -> Result<Value>;

    /// Returns a secret value.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is not set.
    fn secret(&self, key: &str) -> Result<Value>;
}

/// Fully resolved inputs handed to the provisioning engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInputs {
    /// Resolved value per input field.
    pub values: Map<String, Value>,
    /// Top-level fields whose value was derived from a secret.
    pub secret_fields: Vec<String>,
}

impl OutputRef {
    /// Creates a new output reference.
    #[must_use]
    pub fn new(resource: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            field: field.into(),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.field)
    }
}

impl Computed {
    /// Creates a computed value from a label, its dependencies and a pure function.
    ///
    /// The function receives the resolved dependencies in the same order.
    pub fn new<F>(label: impl Into<String>, deps: Vec<InputValue>, func: F) -> Self
    where
        F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            deps,
            func: Arc::new(func),
        }
    }

    /// Human-readable description of the computation.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Inputs the computation depends on.
    #[must_use]
    pub fn deps(&self) -> &[InputValue] {
        &self.deps
    }

    /// Applies the function to resolved dependency values.
    ///
    /// # Errors
    ///
    /// Returns an error if the function rejects its arguments.
    pub fn apply(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args).map_err(|message| {
            StackError::Output(OutputError::ComputeFailed {
                label: self.label.clone(),
                message,
            })
        })
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("label", &self.label)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

impl InputValue {
    /// Creates a literal input.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Creates a reference to another resource's output.
    pub fn output(resource: impl Into<String>, field: impl Into<String>) -> Self {
        Self::OutputRef(OutputRef::new(resource, field))
    }

    /// Creates a secret reference.
    pub fn secret(key: impl Into<String>) -> Self {
        Self::Secret(key.into())
    }

    /// Creates a configuration lookup with an optional fallback.
    pub fn config(key: impl Into<String>, default: Option<Value>) -> Self {
        Self::Config {
            key: key.into(),
            default,
        }
    }

    /// Parses a dotted reference path `resource.field[.key...]`.
    ///
    /// Extra segments pluck nested keys (or array indices) from the output;
    /// a missing nested key evaluates to `null`.
    ///
    /// # Errors
    ///
    /// Returns a message if the path has fewer than two segments.
    pub fn reference(path: &str) -> std::result::Result<Self, String> {
        let segments: Vec<&str> = path.trim().split('.').collect();
        if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
            return Err(format!(
                "reference '{path}' must have the form <resource>.<field>"
            ));
        }

        let base = Self::output(segments[0], segments[1]);
        if segments.len() == 2 {
            return Ok(base);
        }

        let keys: Vec<String> = segments[2..].iter().map(|s| (*s).to_string()).collect();
        Ok(Self::Computed(Computed::new(
            format!("pluck({path})"),
            vec![base],
            move |args| Ok(pluck(args.first().unwrap_or(&Value::Null), &keys)),
        )))
    }

    /// Wraps an input so that `null` or an empty string falls back to `default`.
    #[must_use]
    pub fn or_default(self, default: Value) -> Self {
        let label = format!("default({default})");
        Self::Computed(Computed::new(label, vec![self], move |args| {
            Ok(match args.first() {
                None | Some(Value::Null) => default.clone(),
                Some(Value::String(s)) if s.is_empty() => default.clone(),
                Some(other) => other.clone(),
            })
        }))
    }

    /// Builds a string from a template containing `${resource.field}` placeholders.
    ///
    /// `$${` produces a literal `${`.
    ///
    /// # Errors
    ///
    /// Returns a message if a placeholder is unterminated or not a valid reference.
    pub fn interpolate(template: &str) -> std::result::Result<Self, String> {
        let pieces = parse_template(template)?;

        let deps: Vec<Self> = pieces
            .iter()
            .filter_map(|p| match p {
                TemplatePiece::Ref(dep) => Some(dep.clone()),
                TemplatePiece::Text(_) => None,
            })
            .collect();

        if deps.is_empty() {
            let text: String = pieces
                .into_iter()
                .filter_map(|p| match p {
                    TemplatePiece::Text(t) => Some(t),
                    TemplatePiece::Ref(_) => None,
                })
                .collect();
            return Ok(Self::Literal(Value::String(text)));
        }

        let texts: Vec<Option<String>> = pieces
            .into_iter()
            .map(|p| match p {
                TemplatePiece::Text(t) => Some(t),
                TemplatePiece::Ref(_) => None,
            })
            .collect();

        Ok(Self::Computed(Computed::new(
            format!("interpolate({template})"),
            deps,
            move |args| {
                let mut out = String::new();
                let mut next_arg = args.iter();
                for text in &texts {
                    match text {
                        Some(t) => out.push_str(t),
                        None => {
                            let arg = next_arg
                                .next()
                                .ok_or_else(|| String::from("missing interpolation argument"))?;
                            out.push_str(&stringify(arg));
                        }
                    }
                }
                Ok(Value::String(out))
            },
        )))
    }

    /// Returns true if this value has no deferred parts.
    #[must_use]
    pub const fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Returns true if this value, or anything nested in it, reads a secret.
    #[must_use]
    pub fn contains_secret(&self) -> bool {
        let mut found = false;
        self.walk(&mut |value: &Self| {
            if matches!(value, Self::Secret(_)) {
                found = true;
            }
        });
        found
    }

    /// Visits this value and every nested value, depth first, in declaration order.
    pub fn walk<F: FnMut(&Self)>(&self, visit: &mut F) {
        visit(self);
        match self {
            Self::List(items) => items.iter().for_each(|item| item.walk(visit)),
            Self::Map(entries) => entries.iter().for_each(|(_, item)| item.walk(visit)),
            Self::Computed(computed) => computed.deps.iter().for_each(|dep| dep.walk(visit)),
            Self::Literal(_) | Self::OutputRef(_) | Self::Config { .. } | Self::Secret(_) => {}
        }
    }

    /// Evaluates this value to a concrete JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced output, config value or secret is
    /// unavailable, or if a computation fails.
    pub fn evaluate(&self, lookup: &dyn ValueLookup) -> Result<Value> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::List(items) => items
                .iter()
                .map(|item| item.evaluate(lookup))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Self::Map(entries) => {
                let mut map = Map::new();
                for (key, item) in entries {
                    map.insert(key.clone(), item.evaluate(lookup)?);
                }
                Ok(Value::Object(map))
            }
            Self::OutputRef(reference) => lookup.output(reference),
            Self::Computed(computed) => {
                let args = computed
                    .deps
                    .iter()
                    .map(|dep| dep.evaluate(lookup))
                    .collect::<Result<Vec<_>>>()?;
                computed.apply(&args)
            }
            Self::Config { key, default } => match (lookup.config(key), default) {
                (Ok(value), _) => Ok(value),
                (Err(_), Some(fallback)) => Ok(fallback.clone()),
                (Err(e), None) => Err(e),
            },
            Self::Secret(key) => lookup.secret(key),
        }
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{value}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {item}")?;
                }
                write!(f, "}}")
            }
            Self::OutputRef(reference) => write!(f, "${{{reference}}}"),
            Self::Computed(computed) => write!(f, "{}", computed.label),
            Self::Config { key, .. } => write!(f, "config({key})"),
            Self::Secret(key) => write!(f, "secret({key})"),
        }
    }
}

impl ResolvedInputs {
    /// Returns a copy safe for logging, with secret-derived fields masked.
    #[must_use]
    pub fn redacted(&self) -> Map<String, Value> {
        let mut values = self.values.clone();
        for field in &self.secret_fields {
            if let Some(value) = values.get_mut(field) {
                *value = Value::String(String::from("***"));
            }
        }
        values
    }

    /// Returns the resolved value of a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }
}

enum TemplatePiece {
    Text(String),
    Ref(InputValue),
}

fn parse_template(template: &str) -> std::result::Result<Vec<TemplatePiece>, String> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        text.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("$${") {
            text.push_str("${");
            rest = after;
        } else if let Some(after) = tail.strip_prefix("${") {
            let end = after
                .find('}')
                .ok_or_else(|| format!("unterminated placeholder in '{template}'"))?;
            if !text.is_empty() {
                pieces.push(TemplatePiece::Text(std::mem::take(&mut text)));
            }
            pieces.push(TemplatePiece::Ref(InputValue::reference(&after[..end])?));
            rest = &after[end + 1..];
        } else {
            text.push('$');
            rest = &tail[1..];
        }
    }

    text.push_str(rest);
    if !text.is_empty() {
        pieces.push(TemplatePiece::Text(text));
    }
    Ok(pieces)
}

fn pluck(value: &Value, keys: &[String]) -> Value {
    let mut current = value;
    for key in keys {
        let next = match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use serde_json::json;
    use std::collections::HashMap;

    struct Fixture {
        outputs: HashMap<OutputRef, Value>,
    }

    impl ValueLookup for Fixture {
        fn output(&self, reference: &OutputRef) -> Result<Value> {
            self.outputs.get(reference).cloned().ok_or_else(|| {
                StackError::Output(OutputError::MissingOutput {
                    resource: reference.resource.clone(),
                    field: reference.field.clone(),
                })
            })
        }

        fn config(&self, key: &str) -> Result<Value> {
            Err(ConfigError::MissingValue {
                key: key.to_string(),
            }
            .into())
        }

        fn secret(&self, key: &str) -> Result<Value> {
            Ok(Value::String(format!("s3cr3t-{key}")))
        }
    }

    fn fixture() -> Fixture {
        let mut outputs = HashMap::new();
        outputs.insert(OutputRef::new("webApp", "defaultHostName"), json!("app.example.net"));
        outputs.insert(
            OutputRef::new("webApp", "identity"),
            json!({ "principalId": "p-123", "type": "SystemAssigned" }),
        );
        outputs.insert(OutputRef::new("db", "administratorLogin"), json!(""));
        Fixture { outputs }
    }

    #[test]
    fn test_interpolate_resolves_placeholders() {
        let input = InputValue::interpolate("https://${webApp.defaultHostName}/api").unwrap();
        let value = input.evaluate(&fixture()).unwrap();
        assert_eq!(value, json!("https://app.example.net/api"));
    }

    #[test]
    fn test_interpolate_without_placeholders_is_literal() {
        let input = InputValue::interpolate("plain $text $${kept}").unwrap();
        assert!(input.is_literal());
        assert_eq!(input.evaluate(&fixture()).unwrap(), json!("plain $text ${kept}"));
    }

    #[test]
    fn test_interpolate_rejects_unterminated() {
        assert!(InputValue::interpolate("https://${webApp.host").is_err());
        assert!(InputValue::interpolate("${justone}").is_err());
    }

    #[test]
    fn test_reference_plucks_nested_field() {
        let input = InputValue::reference("webApp.identity.principalId").unwrap();
        assert_eq!(input.evaluate(&fixture()).unwrap(), json!("p-123"));

        let missing = InputValue::reference("webApp.identity.tenantId").unwrap();
        assert_eq!(missing.evaluate(&fixture()).unwrap(), Value::Null);
    }

    #[test]
    fn test_default_applies_to_empty_and_null() {
        let input = InputValue::reference("db.administratorLogin")
            .unwrap()
            .or_default(json!("xxx"));
        assert_eq!(input.evaluate(&fixture()).unwrap(), json!("xxx"));

        let input = InputValue::reference("webApp.identity.tenantId")
            .unwrap()
            .or_default(json!(""));
        assert_eq!(input.evaluate(&fixture()).unwrap(), json!(""));
    }

    #[test]
    fn test_config_falls_back_to_default() {
        let input = InputValue::config("organization", Some(json!("dirien")));
        assert_eq!(input.evaluate(&fixture()).unwrap(), json!("dirien"));

        let required = InputValue::config("organization", None);
        assert!(required.evaluate(&fixture()).is_err());
    }

    #[test]
    fn test_nested_map_and_list_evaluate() {
        let input = InputValue::Map(vec![
            (String::from("server"), InputValue::output("webApp", "defaultHostName")),
            (
                String::from("ports"),
                InputValue::List(vec![InputValue::literal(80), InputValue::literal(443)]),
            ),
            (String::from("password"), InputValue::secret("registryPassword")),
        ]);

        assert!(input.contains_secret());
        let value = input.evaluate(&fixture()).unwrap();
        assert_eq!(
            value,
            json!({
                "server": "app.example.net",
                "ports": [80, 443],
                "password": "s3cr3t-registryPassword",
            })
        );
    }

    #[test]
    fn test_redacted_masks_secret_fields() {
        let mut values = Map::new();
        values.insert(String::from("user"), json!("admin"));
        values.insert(String::from("password"), json!("hunter2"));
        let inputs = ResolvedInputs {
            values,
            secret_fields: vec![String::from("password")],
        };

        let redacted = inputs.redacted();
        assert_eq!(redacted["user"], json!("admin"));
        assert_eq!(redacted["password"], json!("***"));
        assert_eq!(inputs.get("password"), Some(&json!("hunter2")));
    }
}
