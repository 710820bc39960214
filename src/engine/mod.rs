//! External capabilities consumed during a run.
//!
//! The provisioning engine creates resources; the config source supplies
//! configuration values and secrets.

mod config_source;
mod http;
mod provisioner;

pub use config_source::{
    CONFIG_ENV_PREFIX, ConfigSource, MapConfigSource, SECRET_ENV_PREFIX, StackConfigSource,
    screaming_snake,
};
#[cfg(test)]
pub use config_source::MockConfigSource;
pub use http::{DEFAULT_ENGINE_TIMEOUT_SECS, HttpProvisioner};
pub use provisioner::{FnProvisioner, Provisioner};
