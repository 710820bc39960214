//! Stack file handling.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `stackgraph.yaml`
//! - Converting input forms into resource descriptors
//! - Validation, including plaintext secret detection
//! - Computing hashes for change detection

mod hash;
mod inputs;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use inputs::{parse_input, parse_inputs};
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, ENGINE_TOKEN_VAR, find_config_file};
pub use spec::{
    DEFAULT_STATE_DIR, EngineConfig, ProjectConfig, ResourceConfig, SettingsConfig, StackConfig,
    StateConfig,
};
pub use validator::{
    ConfigValidator, ValidationError, ValidationResult, is_sensitive_name, literal_secrets,
};
