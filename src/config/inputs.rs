//! Input forms in the stack file.
//!
//! Plain YAML values are literals. A map whose keys are exactly one of the
//! forms below is special, and must carry a string where a key, path or
//! template is expected:
//!
//! ```yaml
//! { ref: registry.loginServer }               # output reference
//! { ref: webApp.identity.principalId, default: "" }
//! { interpolate: "https://${webApp.defaultHostName}" }
//! { config: location, default: westeurope }
//! { secret: dbPassword }
//! { literal: { ref: not-a-reference } }       # escape hatch
//! ```
//!
//! Any other map or list is walked recursively; it stays a literal when none
//! of its children is deferred. A literal map that happens to use form keys
//! goes through `literal`.

use serde_json::Value;
use serde_yaml::{Mapping, Value as Yaml};

use crate::error::ConfigError;
use crate::resource::InputValue;

/// Parses every input of a resource, in declaration order.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidInput`] for non-string field names and
/// malformed forms.
pub fn parse_inputs(resource: &str, inputs: &Mapping) -> Result<Vec<(String, InputValue)>, ConfigError> {
    inputs
        .iter()
        .map(|(key, value)| {
            let field = key.as_str().ok_or_else(|| {
                ConfigError::invalid_input(resource, format!("{key:?}"), "input names must be strings")
            })?;
            Ok((field.to_string(), parse_input(resource, field, value)?))
        })
        .collect()
}

/// Parses one input value.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidInput`] if a special form is malformed.
pub fn parse_input(resource: &str, field: &str, value: &Yaml) -> Result<InputValue, ConfigError> {
    let invalid = |message: String| ConfigError::invalid_input(resource, field, message);

    match value {
        Yaml::Mapping(map) => {
            if let Some(special) = special_form(map).map_err(invalid)? {
                return Ok(special);
            }

            let mut entries = Vec::with_capacity(map.len());
            for (key, item) in map {
                let key = map_key(key).map_err(invalid)?;
                entries.push((key, parse_input(resource, field, item)?));
            }

            if entries.iter().all(|(_, v)| v.is_literal()) {
                let object = entries
                    .into_iter()
                    .filter_map(|(k, v)| match v {
                        InputValue::Literal(value) => Some((k, value)),
                        _ => None,
                    })
                    .collect();
                Ok(InputValue::Literal(Value::Object(object)))
            } else {
                Ok(InputValue::Map(entries))
            }
        }
        Yaml::Sequence(items) => {
            let items = items
                .iter()
                .map(|item| parse_input(resource, field, item))
                .collect::<Result<Vec<_>, _>>()?;

            if items.iter().all(InputValue::is_literal) {
                let values = items
                    .into_iter()
                    .filter_map(|v| match v {
                        InputValue::Literal(value) => Some(value),
                        _ => None,
                    })
                    .collect();
                Ok(InputValue::Literal(Value::Array(values)))
            } else {
                Ok(InputValue::List(items))
            }
        }
        Yaml::Tagged(tagged) => parse_input(resource, field, &tagged.value),
        scalar => to_json(scalar).map(InputValue::Literal).map_err(invalid),
    }
}

/// Recognises the single-purpose maps. Returns `Ok(None)` for ordinary maps.
///
/// A map whose key set names a form but whose value has the wrong type is an
/// error rather than an ordinary map.
fn special_form(map: &Mapping) -> Result<Option<InputValue>, String> {
    let mut keys: Vec<&str> = map.keys().filter_map(Yaml::as_str).collect();
    if keys.len() != map.len() {
        return Ok(None);
    }
    keys.sort_unstable();

    let default = || map.get("default").map_or(Ok(Value::Null), to_json);

    let parsed = match keys.as_slice() {
        ["ref"] => InputValue::reference(form_text(map, "ref")?)?,
        ["default", "ref"] => InputValue::reference(form_text(map, "ref")?)?.or_default(default()?),
        ["interpolate"] => InputValue::interpolate(form_text(map, "interpolate")?)?,
        ["config"] => InputValue::config(form_text(map, "config")?, None),
        ["config", "default"] => InputValue::config(form_text(map, "config")?, Some(default()?)),
        ["secret"] => InputValue::secret(form_text(map, "secret")?),
        ["literal"] => InputValue::Literal(map.get("literal").map_or(Ok(Value::Null), to_json)?),
        _ => return Ok(None),
    };
    Ok(Some(parsed))
}

/// The string under `key` of a special form.
fn form_text<'a>(map: &'a Mapping, key: &str) -> Result<&'a str, String> {
    match map.get(key) {
        Some(Yaml::String(s)) => Ok(s.as_str()),
        Some(other) => Err(format!("'{key}' must be a string, found {}", yaml_kind(other))),
        None => Err(format!("'{key}' is missing")),
    }
}

const fn yaml_kind(value: &Yaml) -> &'static str {
    match value {
        Yaml::Null => "null",
        Yaml::Bool(_) => "a boolean",
        Yaml::Number(_) => "a number",
        Yaml::String(_) => "a string",
        Yaml::Sequence(_) => "a list",
        Yaml::Mapping(_) => "a map",
        Yaml::Tagged(_) => "a tagged value",
    }
}

fn map_key(key: &Yaml) -> Result<String, String> {
    match key {
        Yaml::String(s) => Ok(s.clone()),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        other => Err(format!("unsupported map key {other:?}")),
    }
}

fn to_json(value: &Yaml) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| format!("cannot convert value: {e}"))
}
