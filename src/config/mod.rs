//! Configuration module for Strata programs.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `strata.yaml`
//! - Validation of configuration values
//! - Computing program hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ProgramHasher;
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use spec::{
    EngineConfig, ProgramConfig, ProjectConfig, ResourceConfig, RetryConfig, StateBackend,
    StateConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
