//! Program hashing for change detection.
//!
//! The hash is recorded in the checkpoint manifest so that a deployment can
//! tell at a glance whether the program changed since the last run.

use sha2::{Digest, Sha256};

use super::spec::{ProgramConfig, ResourceConfig};

/// Hasher for computing program hashes.
#[derive(Debug, Default)]
pub struct ProgramHasher;

impl ProgramHasher {
    /// Creates a new program hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the project identity and every resource.
    ///
    /// Engine and state settings are excluded: they change how a program is
    /// deployed, not what it deploys.
    #[must_use]
    pub fn hash_program(&self, config: &ProgramConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.project.name.as_bytes());
        hasher.update([0]);
        hasher.update(config.project.stack.as_bytes());

        // Registration order matters: it decides the graph's tie-breaks.
        for resource in &config.resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource declaration.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.type_token.as_bytes());
        hasher.update([0]);
        hasher.update(resource.name.as_bytes());
        hasher.update([0]);
        if let Some(parent) = &resource.parent {
            hasher.update(parent.as_bytes());
        }
        hasher.update([u8::from(resource.component)]);

        // Object keys serialize sorted, so equal inputs give equal bytes.
        for (key, value) in &resource.inputs {
            hasher.update(key.as_bytes());
            hasher.update(value.to_string().as_bytes());
        }

        let options = &resource.options;
        hasher.update([
            u8::from(options.protect),
            u8::from(options.delete_before_replace),
            u8::from(options.retain_on_delete),
        ]);
        for key in options.ignore_changes.iter().chain(&options.replace_on_changes) {
            hasher.update(key.as_bytes());
            hasher.update([0]);
        }
        if let Some(id) = &options.import_id {
            hasher.update(id.as_bytes());
        }

        let mut deps: Vec<_> = resource.depends_on.iter().collect();
        deps.sort();
        for dep in deps {
            hasher.update(dep.as_bytes());
            hasher.update([0]);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::{EngineConfig, ProjectConfig, StateConfig};
    use serde_json::json;

    fn program(resources: Vec<ResourceConfig>) -> ProgramConfig {
        ProgramConfig {
            project: ProjectConfig {
                name: "demo".into(),
                stack: "dev".into(),
            },
            state: StateConfig::default(),
            engine: EngineConfig::default(),
            resources,
        }
    }

    fn file(name: &str, content: &str) -> ResourceConfig {
        let mut rc = ResourceConfig::new("file:index:File", name);
        rc.inputs.insert("path".into(), json!(format!("/tmp/{name}")));
        rc.inputs.insert("content".into(), json!(content));
        rc
    }

    #[test]
    fn test_program_hash_deterministic() {
        let hasher = ProgramHasher::new();
        let config = program(vec![file("a", "x"), file("b", "y")]);

        assert_eq!(hasher.hash_program(&config), hasher.hash_program(&config.clone()));
    }

    #[test]
    fn test_input_change_changes_hash() {
        let hasher = ProgramHasher::new();
        let before = program(vec![file("a", "x")]);
        let after = program(vec![file("a", "z")]);

        assert_ne!(hasher.hash_program(&before), hasher.hash_program(&after));
    }

    #[test]
    fn test_engine_settings_do_not_change_hash() {
        let hasher = ProgramHasher::new();
        let before = program(vec![file("a", "x")]);
        let mut after = before.clone();
        after.engine.parallelism = 1;

        assert_eq!(hasher.hash_program(&before), hasher.hash_program(&after));
    }

    #[test]
    fn test_short_hash() {
        let hasher = ProgramHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");

        assert_eq!(short, "abcdef12");
    }

    #[test]
    fn test_hashes_match() {
        assert!(ProgramHasher::hashes_match("abc123", "abc123"));
        assert!(!ProgramHasher::hashes_match("abc123", "abc124"));
        assert!(!ProgramHasher::hashes_match("abc123", "abc12"));
    }
}
