//! `command:local:Command`: runs shell commands on the local machine.
//!
//! Inputs:
//! - `create` (required): run when the resource is created.
//! - `update`: run when inputs change in place.
//! - `delete`: run when the resource is deleted.
//! - `environment`: object of extra environment variables.
//! - `dir`: working directory.
//!
//! Outputs are the trimmed `stdout` and `stderr` of the last command run.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{CreateResponse, DiffChanges, Provider, ReadResponse};
use crate::resource::{PropertyMap, PropertyValue, Urn, diff_keys};

/// Keys whose change recreates the resource when no `update` command is set.
const REPLACE_KEYS: &[&str] = &["create", "environment", "dir"];

/// Provider for local shell commands.
#[derive(Debug, Clone, Default)]
pub struct CommandProvider;

impl CommandProvider {
    /// Creates the provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn command_input<'a>(inputs: &'a PropertyMap, key: &str) -> Option<&'a str> {
        inputs.get(key).and_then(PropertyValue::as_str).filter(|s| !s.is_empty())
    }

    async fn run(urn: &Urn, script: &str, inputs: &PropertyMap) -> ProviderResult<PropertyMap> {
        debug!(urn = %urn, script, "Running command");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = Self::command_input(inputs, "dir") {
            cmd.current_dir(dir);
        }
        if let Some(PropertyValue::Object(env)) = inputs.get("environment") {
            for (key, value) in env {
                let value = value.revealed();
                match value.as_str() {
                    Some(s) => cmd.env(key, s),
                    None => cmd.env(key, value.to_string()),
                };
            }
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| ProviderError::from_io("failed to spawn command", &e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(ProviderError::terminal(format!(
                "command exited with {}: {stderr}",
                output.status
            )));
        }

        let mut outputs = PropertyMap::new();
        outputs.insert("stdout".into(), stdout.into());
        outputs.insert("stderr".into(), stderr.into());
        Ok(outputs)
    }
}

#[async_trait]
impl Provider for CommandProvider {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn diff(
        &self,
        _urn: &Urn,
        _id: &str,
        old: &PropertyMap,
        new: &PropertyMap,
    ) -> ProviderResult<DiffChanges> {
        let keys = diff_keys(old, new);
        if keys.is_empty() {
            return Ok(DiffChanges::None);
        }

        let replace_keys: Vec<String> = keys
            .iter()
            .filter(|k| REPLACE_KEYS.contains(&k.as_str()))
            .cloned()
            .collect();

        if replace_keys.is_empty() || Self::command_input(new, "update").is_some() {
            Ok(DiffChanges::Update { keys })
        } else {
            Ok(DiffChanges::Replace { keys: replace_keys })
        }
    }

    async fn create(&self, urn: &Urn, inputs: &PropertyMap) -> ProviderResult<CreateResponse> {
        let script = Self::command_input(inputs, "create")
            .ok_or_else(|| ProviderError::terminal("missing required input 'create'"))?;
        let outputs = Self::run(urn, script, inputs).await?;

        Ok(CreateResponse {
            id: Uuid::new_v4().to_string(),
            outputs,
        })
    }

    async fn read(&self, _urn: &Urn, id: &str, _inputs: &PropertyMap) -> ProviderResult<ReadResponse> {
        // Commands leave nothing behind to inspect; adopting one just records it.
        Ok(ReadResponse {
            id: id.to_string(),
            outputs: PropertyMap::new(),
        })
    }

    async fn update(
        &self,
        urn: &Urn,
        _id: &str,
        _old: &PropertyMap,
        new: &PropertyMap,
    ) -> ProviderResult<PropertyMap> {
        match Self::command_input(new, "update") {
            Some(script) => Self::run(urn, script, new).await,
            None => Ok(PropertyMap::new()),
        }
    }

    async fn delete(&self, urn: &Urn, _id: &str, inputs: &PropertyMap) -> ProviderResult<()> {
        if let Some(script) = Self::command_input(inputs, "delete") {
            Self::run(urn, script, inputs).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urn() -> Urn {
        Urn::new("dev", "test", None, "command:local:Command", "hello")
    }

    fn inputs(pairs: &[(&str, &str)]) -> PropertyMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), PropertyValue::from(*v)))
            .collect()
    }

    #[tokio::test]
    async fn test_create_captures_stdout() {
        let provider = CommandProvider::new();
        let response = provider
            .create(&urn(), &inputs(&[("create", "echo hello")]))
            .await
            .unwrap();
        assert_eq!(response.outputs.get("stdout"), Some(&"hello".into()));
        assert!(!response.id.is_empty());
    }

    #[tokio::test]
    async fn test_environment_is_passed() {
        let provider = CommandProvider::new();
        let mut map = inputs(&[("create", "echo $GREETING")]);
        map.insert(
            "environment".into(),
            PropertyValue::Object(inputs(&[("GREETING", "hi there")])),
        );
        let response = provider.create(&urn(), &map).await.unwrap();
        assert_eq!(response.outputs.get("stdout"), Some(&"hi there".into()));
    }

    #[tokio::test]
    async fn test_secret_environment_values_are_revealed() {
        let provider = CommandProvider::new();
        let mut env = PropertyMap::new();
        env.insert("PORT".into(), PropertyValue::Secret(Box::new(PropertyValue::Number(8080.0))));
        env.insert("FLAG".into(), PropertyValue::Secret(Box::new(PropertyValue::Bool(true))));
        let mut map = inputs(&[("create", "echo $PORT $FLAG")]);
        map.insert("environment".into(), PropertyValue::Object(env));

        let response = provider.create(&urn(), &map).await.unwrap();
        assert_eq!(response.outputs.get("stdout"), Some(&"8080 true".into()));
    }

    #[tokio::test]
    async fn test_failing_command_is_terminal() {
        let provider = CommandProvider::new();
        let err = provider
            .create(&urn(), &inputs(&[("create", "echo boom >&2; exit 3")]))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_diff_replace_vs_update() {
        let provider = CommandProvider::new();
        let old = inputs(&[("create", "echo a")]);

        let changed = inputs(&[("create", "echo b")]);
        let diff = provider.diff(&urn(), "id", &old, &changed).await.unwrap();
        assert_eq!(diff, DiffChanges::Replace { keys: vec!["create".into()] });

        let with_update = inputs(&[("create", "echo b"), ("update", "echo u")]);
        let diff = provider.diff(&urn(), "id", &old, &with_update).await.unwrap();
        assert!(matches!(diff, DiffChanges::Update { .. }));

        let delete_only = inputs(&[("create", "echo a"), ("delete", "true")]);
        let diff = provider.diff(&urn(), "id", &old, &delete_only).await.unwrap();
        assert_eq!(diff, DiffChanges::Update { keys: vec!["delete".into()] });

        let diff = provider.diff(&urn(), "id", &old, &old).await.unwrap();
        assert_eq!(diff, DiffChanges::None);
    }
}
