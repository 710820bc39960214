//! Configuration and secret lookup capability.
//!
//! Resources read stack configuration through [`ConfigSource`] at execution
//! time instead of from ambient process state.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::error::ConfigError;

/// Prefix of environment variables overriding config values.
pub const CONFIG_ENV_PREFIX: &str = "STACKGRAPH_CONFIG_";

/// Prefix of environment variables holding secrets.
pub const SECRET_ENV_PREFIX: &str = "STACKGRAPH_SECRET_";

/// Reads configuration values and secrets by key.
#[cfg_attr(test, mockall::automock)]
pub trait ConfigSource: Send + Sync {
    /// Returns a non-secret configuration value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingValue`] if the key is not set.
    fn get_config_value(&self, key: &str) -> Result<String, ConfigError>;

    /// Returns a secret value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingValue`] if the secret is not set.
    fn get_secret(&self, key: &str) -> Result<String, ConfigError>;
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Config source backed by the stack file and the environment.
///
/// Config values come from `STACKGRAPH_CONFIG_<KEY>` first, then the stack
/// file's `config:` map. Secrets come only from `STACKGRAPH_SECRET_<KEY>`.
/// `<KEY>` is the key in screaming snake case.
#[derive(Clone)]
pub struct StackConfigSource {
    values: BTreeMap<String, String>,
    env: EnvLookup,
}

/// In-memory config source.
#[derive(Debug, Clone, Default)]
pub struct MapConfigSource {
    config: HashMap<String, String>,
    secrets: HashMap<String, String>,
}

impl StackConfigSource {
    /// Creates a source reading the process environment.
    #[must_use]
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self::with_env_lookup(values, |name| std::env::var(name).ok())
    }

    /// Creates a source with a custom environment lookup.
    #[must_use]
    pub fn with_env_lookup<F>(values: BTreeMap<String, String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            values,
            env: Arc::new(lookup),
        }
    }

    /// Environment variable overriding config `key`.
    #[must_use]
    pub fn config_var(key: &str) -> String {
        format!("{CONFIG_ENV_PREFIX}{}", screaming_snake(key))
    }

    /// Environment variable holding secret `key`.
    #[must_use]
    pub fn secret_var(key: &str) -> String {
        format!("{SECRET_ENV_PREFIX}{}", screaming_snake(key))
    }

    fn env_value(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }
}

impl ConfigSource for StackConfigSource {
    fn get_config_value(&self, key: &str) -> Result<String, ConfigError> {
        let var = Self::config_var(key);
        if let Some(value) = self.env_value(&var) {
            trace!("Config {key} read from {var}");
            return Ok(value);
        }
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::MissingValue {
                key: key.to_string(),
            })
    }

    fn get_secret(&self, key: &str) -> Result<String, ConfigError> {
        self.env_value(&Self::secret_var(key))
            .ok_or_else(|| ConfigError::MissingValue {
                key: key.to_string(),
            })
    }
}

impl fmt::Debug for StackConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackConfigSource")
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}

impl MapConfigSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a config value.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Adds a secret.
    #[must_use]
    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }
}

impl ConfigSource for MapConfigSource {
    fn get_config_value(&self, key: &str) -> Result<String, ConfigError> {
        self.config
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::MissingValue {
                key: key.to_string(),
            })
    }

    fn get_secret(&self, key: &str) -> Result<String, ConfigError> {
        self.secrets
            .get(key)
            .cloned()
            .ok_or_else(|| ConfigError::MissingValue {
                key: key.to_string(),
            })
    }
}

/// Converts a config key to an environment variable suffix:
/// `azureDevOpsToken` becomes `AZURE_DEV_OPS_TOKEN`, `db.admin-user`
/// becomes `DB_ADMIN_USER`.
#[must_use]
pub fn screaming_snake(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == '.' || c == '_' || c.is_whitespace() {
            if !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }

        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_lower);
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.extend(c.to_uppercase());
    }

    out.trim_matches('_').to_string()
}
