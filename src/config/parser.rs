//! Configuration parser for loading program files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result, StrataError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::spec::ProgramConfig;

/// Configuration parser for loading programs.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ProgramConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(StrataError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            StrataError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut config = self.parse_yaml(&content, Some(path))?;
        self.resolve_state_path(&mut config);
        Ok(config)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ProgramConfig> {
        debug!("Parsing YAML configuration");

        let config: ProgramConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string()).or_else(|| {
                e.location()
                    .map(|l| format!("line {}, column {}", l.line(), l.column()))
            });
            StrataError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            project = %config.project.name,
            stack = %config.project.stack,
            resources = config.resources.len(),
            "Parsed configuration"
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `STRATA_<SECTION>_<KEY>` (e.g., `STRATA_PROJECT_NAME`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// is malformed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<ProgramConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut ProgramConfig) -> Result<()> {
        if let Ok(name) = std::env::var("STRATA_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Ok(stack) = std::env::var("STRATA_STACK") {
            debug!("Overriding project.stack from environment");
            config.project.stack = stack;
        }

        if let Ok(path) = std::env::var("STRATA_STATE_PATH") {
            debug!("Overriding state.path from environment");
            config.state.path = Some(path);
        }

        if let Ok(value) = std::env::var("STRATA_PARALLELISM") {
            debug!("Overriding engine.parallelism from environment");
            config.engine.parallelism = value.parse().map_err(|_| {
                ConfigError::validation(
                    format!("STRATA_PARALLELISM must be a positive integer, got '{value}'"),
                    "engine.parallelism",
                )
            })?;
        }

        Ok(())
    }

    /// Makes a relative local state path relative to the base path.
    fn resolve_state_path(&self, config: &mut ProgramConfig) {
        let Some(base) = &self.base_path else {
            return;
        };
        let dir = config.state.state_dir();
        if dir.is_relative() {
            config.state.path = Some(base.join(dir).display().to_string());
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                StrataError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["strata.yaml", "strata.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    warn!("No configuration file found from {}", start.display());
    Err(StrataError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateBackend;
    use crate::resource::PropertyValue;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
project:
  name: test-project
";
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(config.project.name, "test-project");
        assert_eq!(config.project.stack, "dev");
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.engine.parallelism, crate::engine::DEFAULT_PARALLELISM);
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
project:
  name: demo
  stack: prod

state:
  backend: memory

engine:
  parallelism: 4
  step_timeout_secs: 60
  deployment_timeout_secs: 600
  retry:
    max_attempts: 5
    initial_backoff_ms: 100

resources:
  - type: file:index:File
    name: config
    inputs:
      path: /tmp/demo.conf
      content: "listen 8080"
    options:
      protect: true
  - type: command:local:Command
    name: reload
    inputs:
      create: "cat /tmp/demo.conf"
      environment:
        CONFIG_HASH: { "$ref": config, property: sha256 }
    depends_on: [config]
"#;
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(config.project.stack, "prod");
        assert_eq!(config.state.backend, StateBackend::Memory);
        assert_eq!(config.engine.parallelism, 4);
        assert_eq!(config.engine.retry.max_attempts, 5);
        assert_eq!(config.engine.retry.max_backoff_ms, 10_000);
        assert_eq!(config.resources.len(), 2);
        assert!(config.resources[0].options.protect);

        let regs = config.registrations().unwrap();
        let PropertyValue::Object(env) = &regs[1].inputs["environment"] else {
            panic!("environment should be an object");
        };
        assert!(matches!(env["CONFIG_HASH"], PropertyValue::Reference { .. }));
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = ConfigParser::new()
            .parse_yaml("project: [unclosed", None)
            .unwrap_err();
        assert!(matches!(
            err,
            StrataError::Config(ConfigError::ParseError { location: Some(_), .. })
        ));
    }

    #[test]
    fn test_load_file_resolves_state_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strata.yaml");
        std::fs::write(&path, "project:\n  name: demo\n").unwrap();

        let config = ConfigParser::new()
            .with_base_path(dir.path())
            .load_file(&path)
            .unwrap();
        assert_eq!(config.state.state_dir(), dir.path().join(crate::state::STATE_DIR));
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("strata.yaml"), "project:\n  name: demo\n").unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("strata.yaml"));
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigParser::new().load_file("/nonexistent/strata.yaml").unwrap_err();
        assert!(matches!(err, StrataError::Config(ConfigError::FileNotFound { .. })));
    }
}
