//! Program configuration types.
//!
//! This module defines the structs that map to `strata.yaml`: the project and
//! stack, where state lives, engine settings, and the ordered list of
//! resource registrations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::graph::{GraphBuilder, ResourceGraph};
use crate::provider::RetryPolicy;
use crate::resource::{
    PropertyMap, PropertyValue, REF_KEY, ResourceOptions, ResourceRegistration, Urn,
};
use crate::state::STATE_DIR;

/// The root of a program configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgramConfig {
    /// Project and stack.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Resources, in registration order.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Project name.
    pub name: String,
    /// Stack (deployment target) name.
    #[serde(default = "default_stack")]
    pub stack: String,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: StateBackend,
    /// Directory for the local backend.
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// JSON checkpoint files on disk.
    #[default]
    Local,
    /// Process memory; nothing survives the run.
    Memory,
}

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Maximum number of steps running at once.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Timeout for a single provider call, in seconds.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
    /// Deadline for the whole deployment, in seconds.
    #[serde(default)]
    pub deployment_timeout_secs: Option<u64>,
    /// Provider retry settings.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Provider retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failure, in milliseconds.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Upper bound for any delay, in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Growth factor between delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

/// A resource registration as written in the configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Type token (`package:module:Type`).
    #[serde(rename = "type")]
    pub type_token: String,
    /// Resource name.
    pub name: String,
    /// Name of an earlier resource to nest under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Grouping resource with no provider.
    #[serde(default, skip_serializing_if = "is_false")]
    pub component: bool,
    /// Inputs; `{"$ref": name}` objects reference other resources.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    /// Resource options.
    #[serde(default)]
    pub options: ResourceOptions,
    /// Names or URNs of explicit dependencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

fn default_stack() -> String {
    String::from("dev")
}

const fn default_parallelism() -> usize {
    crate::engine::DEFAULT_PARALLELISM
}

const fn default_step_timeout() -> u64 {
    crate::provider::DEFAULT_STEP_TIMEOUT_SECS
}

const fn default_max_attempts() -> u32 {
    crate::provider::DEFAULT_MAX_ATTEMPTS
}

const fn default_initial_backoff() -> u64 {
    500
}

const fn default_max_backoff() -> u64 {
    10_000
}

const fn default_multiplier() -> f64 {
    2.0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(b: &bool) -> bool {
    !*b
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            step_timeout_secs: default_step_timeout(),
            deployment_timeout_secs: None,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

impl StateConfig {
    /// Directory holding local checkpoints.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        PathBuf::from(self.path.as_deref().unwrap_or(STATE_DIR))
    }
}

impl EngineConfig {
    /// Timeout for a single provider call.
    #[must_use]
    pub const fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    /// Deadline for the whole deployment.
    #[must_use]
    pub fn deployment_timeout(&self) -> Option<Duration> {
        self.deployment_timeout_secs.map(Duration::from_secs)
    }
}

impl RetryConfig {
    /// Converts to the gateway's retry policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
        }
    }
}

impl ResourceConfig {
    /// Creates a resource with no inputs.
    #[must_use]
    pub fn new(type_token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_token: type_token.into(),
            name: name.into(),
            parent: None,
            component: false,
            inputs: BTreeMap::new(),
            options: ResourceOptions::default(),
            depends_on: Vec::new(),
        }
    }
}

impl ProgramConfig {
    /// URNs of top-level resources by name; the targets of name references.
    fn top_level_urns(&self) -> HashMap<&str, Urn> {
        self.resources
            .iter()
            .filter(|r| r.parent.is_none())
            .map(|r| {
                let urn = Urn::new(
                    &self.project.stack,
                    &self.project.name,
                    None,
                    &r.type_token,
                    &r.name,
                );
                (r.name.as_str(), urn)
            })
            .collect()
    }

    /// Converts the resource list into registrations, resolving names in
    /// references, parents, and `depends_on` to URNs.
    ///
    /// # Errors
    ///
    /// Returns an error if a name does not match any resource or an input
    /// cannot be converted.
    pub fn registrations(&self) -> Result<Vec<ResourceRegistration>> {
        let top_level = self.top_level_urns();
        let mut registered: HashMap<&str, Urn> = HashMap::new();
        let mut out = Vec::with_capacity(self.resources.len());

        for rc in &self.resources {
            let unknown = |name: &str| ConfigError::UnknownReference {
                resource: rc.name.clone(),
                name: name.to_string(),
            };
            let lookup = |name: &str| -> std::result::Result<Urn, ConfigError> {
                if name.starts_with("urn:") {
                    return Urn::parse(name).map_err(|_| unknown(name));
                }
                top_level.get(name).cloned().ok_or_else(|| unknown(name))
            };

            let parent = match &rc.parent {
                Some(name) => Some(
                    registered
                        .get(name.as_str())
                        .cloned()
                        .ok_or_else(|| unknown(name.as_str()))?,
                ),
                None => None,
            };

            let mut inputs = PropertyMap::new();
            for (key, value) in &rc.inputs {
                let resolved = resolve_names(value.clone(), &lookup)?;
                let value = PropertyValue::from_json(resolved).map_err(|message| {
                    ConfigError::ParseError {
                        message,
                        location: Some(format!("{}.inputs.{key}", rc.name)),
                    }
                })?;
                inputs.insert(key.clone(), value);
            }

            let depends_on = rc
                .depends_on
                .iter()
                .map(|name| lookup(name.as_str()))
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let urn = Urn::new(
                &self.project.stack,
                &self.project.name,
                parent.as_ref(),
                &rc.type_token,
                &rc.name,
            );
            registered.entry(rc.name.as_str()).or_insert(urn);

            out.push(ResourceRegistration {
                type_token: rc.type_token.clone(),
                name: rc.name.clone(),
                parent,
                custom: !rc.component,
                inputs,
                depends_on,
                options: rc.options.clone(),
            });
        }

        Ok(out)
    }

    /// Registers every resource and validates the resulting graph.
    ///
    /// # Errors
    ///
    /// Returns an error for unresolvable names, duplicate URNs, dangling
    /// dependencies, or cycles.
    pub fn build_graph(&self) -> Result<ResourceGraph> {
        let mut builder = GraphBuilder::new(&self.project.stack, &self.project.name);
        for registration in self.registrations()? {
            builder.register(registration)?;
        }
        builder.finalize()
    }
}

/// Rewrites `{"$ref": name}` objects so they carry URNs.
fn resolve_names<F>(value: Value, lookup: &F) -> std::result::Result<Value, ConfigError>
where
    F: Fn(&str) -> std::result::Result<Urn, ConfigError>,
{
    Ok(match value {
        Value::Object(mut map) => {
            if let Some(Value::String(target)) = map.get(REF_KEY) {
                let urn = lookup(target.as_str())?;
                map.insert(REF_KEY.to_string(), Value::String(urn.into()));
                return Ok(Value::Object(map));
            }
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| resolve_names(v, lookup).map(|v| (k, v)))
                    .collect::<std::result::Result<_, _>>()?,
            )
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| resolve_names(v, lookup))
                .collect::<std::result::Result<_, _>>()?,
        ),
        other => other,
    })
}
