//! Configuration validation for programs.
//!
//! This module checks a parsed program before anything is planned, reporting
//! every problem it finds rather than stopping at the first one.

use crate::error::{ConfigError, Result, StrataError};
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

use super::spec::{EngineConfig, ProgramConfig, ProjectConfig, ResourceConfig, StateBackend};
use crate::resource::REF_KEY;

/// Validator for program configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

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
    pub const fn new() -> Self {
        Self
    }

    /// Validates a program configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, config: &ProgramConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            Err(StrataError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        } else {
            debug!("Configuration validation passed");
            Ok(result)
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &ProgramConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(&config.project, &mut result);
        if config.state.backend == StateBackend::Memory {
            result
                .warnings
                .push(String::from("Memory state backend does not persist anything"));
        }
        Self::validate_engine(&config.engine, &mut result);
        Self::validate_resources(&config.resources, &mut result);

        result
    }

    /// Validates project configuration.
    fn validate_project(project: &ProjectConfig, result: &mut ValidationResult) {
        for (field, value) in [("project.name", &project.name), ("project.stack", &project.stack)] {
            if value.is_empty() {
                result.error(field, format!("{field} cannot be empty"));
            } else if !is_valid_name(value) {
                result.error(
                    field,
                    format!("'{value}' is invalid. Must be lowercase alphanumeric with hyphens."),
                );
            }
        }
    }

    /// Validates engine settings.
    fn validate_engine(engine: &EngineConfig, result: &mut ValidationResult) {
        if engine.parallelism == 0 {
            result.error("engine.parallelism", "Parallelism must be at least 1");
        }
        if engine.step_timeout_secs == 0 {
            result.error("engine.step_timeout_secs", "Step timeout must be positive");
        }
        if engine.deployment_timeout_secs == Some(0) {
            result.error(
                "engine.deployment_timeout_secs",
                "Deployment timeout must be positive",
            );
        }

        let retry = &engine.retry;
        if retry.max_attempts == 0 {
            result.error("engine.retry.max_attempts", "At least one attempt is required");
        }
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            result.error(
                "engine.retry.initial_backoff_ms",
                format!(
                    "Initial backoff ({}ms) exceeds maximum backoff ({}ms)",
                    retry.initial_backoff_ms, retry.max_backoff_ms
                ),
            );
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            result.error("engine.retry.multiplier", "Backoff multiplier must be at least 1.0");
        }
    }

    /// Validates all resource registrations.
    fn validate_resources(resources: &[ResourceConfig], result: &mut ValidationResult) {
        if resources.is_empty() {
            result.warnings.push(String::from("No resources defined in configuration"));
            return;
        }

        let top_level: HashSet<&str> = resources
            .iter()
            .filter(|r| r.parent.is_none())
            .map(|r| r.name.as_str())
            .collect();
        let mut seen: HashSet<(Option<&str>, &str)> = HashSet::new();
        let mut earlier: HashSet<&str> = HashSet::new();

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !is_valid_type_token(&resource.type_token) {
                result.error(
                    format!("{prefix}.type"),
                    format!(
                        "Type '{}' must have the form package:module:Type",
                        resource.type_token
                    ),
                );
            }

            if resource.name.is_empty() {
                result.error(format!("{prefix}.name"), "Resource name cannot be empty");
            } else if resource.name.contains("::") || resource.name.contains('$') {
                result.error(
                    format!("{prefix}.name"),
                    format!("Resource name '{}' may not contain '::' or '$'", resource.name),
                );
            }

            if !seen.insert((resource.parent.as_deref(), resource.name.as_str())) {
                result.error(
                    format!("{prefix}.name"),
                    format!("Duplicate resource name: {}", resource.name),
                );
            }

            if let Some(parent) = &resource.parent
                && !earlier.contains(parent.as_str())
            {
                result.error(
                    format!("{prefix}.parent"),
                    format!("Parent '{parent}' must be declared before '{}'", resource.name),
                );
            }

            for dep in &resource.depends_on {
                if !dep.starts_with("urn:") && !top_level.contains(dep.as_str()) {
                    result.error(
                        format!("{prefix}.depends_on"),
                        format!("Unknown resource '{dep}'"),
                    );
                }
            }

            for (key, value) in &resource.inputs {
                let mut names = Vec::new();
                collect_ref_names(value, &mut names);
                for name in names {
                    if !name.starts_with("urn:") && !top_level.contains(name) {
                        result.error(
                            format!("{prefix}.inputs.{key}"),
                            format!("Reference to unknown resource '{name}'"),
                        );
                    }
                }
            }

            if resource.component && resource.options.import_id.is_some() {
                result.error(
                    format!("{prefix}.options.import_id"),
                    "Components cannot be imported",
                );
            }

            earlier.insert(resource.name.as_str());
        }
    }
}

fn collect_ref_names<'a>(value: &'a Value, into: &mut Vec<&'a str>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(name)) = map.get(REF_KEY) {
                into.push(name);
            } else {
                map.values().for_each(|v| collect_ref_names(v, into));
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_ref_names(v, into)),
        _ => {}
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    // First character must be a letter
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    // Rest must be lowercase alphanumeric or hyphen
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Type tokens have three non-empty `:` separated segments.
fn is_valid_type_token(token: &str) -> bool {
    let parts: Vec<&str> = token.split(':').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty())
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

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

    fn parse(yaml: &str) -> ProgramConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("web-app"));
        assert!(is_valid_name("stack-123"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Web-App")); // uppercase
        assert!(!is_valid_name("123-app")); // starts with number
        assert!(!is_valid_name("web_app")); // underscore
        assert!(!is_valid_name("app-")); // ends with hyphen
        assert!(!is_valid_name("web--app")); // consecutive hyphens
    }

    #[test]
    fn test_type_tokens() {
        assert!(is_valid_type_token("file:index:File"));
        assert!(!is_valid_type_token("file:File"));
        assert!(!is_valid_type_token("file::File"));
    }

    #[test]
    fn test_valid_program() {
        let config = parse(
            r#"
project: { name: demo, stack: dev }
resources:
  - type: file:index:File
    name: conf
    inputs: { path: /tmp/x }
  - type: command:local:Command
    name: show
    inputs:
      create: { "$ref": conf, property: path }
"#,
        );
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_collects_every_error() {
        let config = parse(
            r#"
project: { name: Demo, stack: "" }
engine:
  parallelism: 0
  retry: { max_attempts: 0, initial_backoff_ms: 5000, max_backoff_ms: 100 }
resources:
  - type: badtoken
    name: a
  - type: file:index:File
    name: a
  - type: file:index:File
    name: b
    parent: later
    depends_on: [ghost]
    inputs:
      x: [{ "$ref": nowhere }]
"#,
        );
        let validator = ConfigValidator::new();
        let result = validator.check(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();

        assert!(fields.contains(&"project.name"));
        assert!(fields.contains(&"project.stack"));
        assert!(fields.contains(&"engine.parallelism"));
        assert!(fields.contains(&"engine.retry.max_attempts"));
        assert!(fields.contains(&"engine.retry.initial_backoff_ms"));
        assert!(fields.contains(&"resources[0].type"));
        assert!(fields.contains(&"resources[1].name"));
        assert!(fields.contains(&"resources[2].parent"));
        assert!(fields.contains(&"resources[2].depends_on"));
        assert!(fields.contains(&"resources[2].inputs.x"));
        assert!(validator.validate(&config).is_err());
    }

    #[test]
    fn test_warnings() {
        let config = parse("project: { name: demo }\nstate: { backend: memory }\n");
        let result = ConfigValidator::new().validate(&config).unwrap();
        assert_eq!(result.warning_count(), 2);
    }
}
