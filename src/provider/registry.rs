//! Provider lookup by type-token package.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::graph::ResourceGraph;
use crate::resource::package_of;
use crate::state::Checkpoint;

use super::builtin::{CommandProvider, FileProvider};
use super::interface::Provider;

/// Providers keyed by the package segment of a type token.
///
/// Built once before a deployment starts and shared read-only by all steps.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in `command` and `file` providers.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CommandProvider::new()));
        registry.register(Arc::new(FileProvider::new()));
        registry
    }

    /// Registers a provider under its own package name, replacing any
    /// previous provider for that package.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.register_as(provider.name(), provider);
    }

    /// Registers a provider under an explicit package name.
    pub fn register_as(&mut self, package: &str, provider: Arc<dyn Provider>) {
        debug!(package, "Registered provider");
        self.providers.insert(package.to_string(), provider);
    }

    /// Returns true if a provider serves the package.
    #[must_use]
    pub fn has_package(&self, package: &str) -> bool {
        self.providers.contains_key(package)
    }

    /// Registered package names, sorted.
    #[must_use]
    pub fn packages(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Finds the provider for a type token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed or no provider serves its
    /// package.
    pub fn get(&self, type_token: &str) -> Result<Arc<dyn Provider>> {
        let package = package_of(type_token)?;
        self.providers.get(package).cloned().ok_or_else(|| {
            ConfigError::UnknownProvider {
                package: package.to_string(),
                type_token: type_token.to_string(),
            }
            .into()
        })
    }

    /// Checks that every custom resource in the graph and the prior
    /// checkpoint has a provider.
    ///
    /// # Errors
    ///
    /// Returns the first missing provider as a configuration error.
    pub fn validate(&self, graph: &ResourceGraph, prior: Option<&Checkpoint>) -> Result<()> {
        let desired = graph
            .resources()
            .filter(|r| r.custom)
            .map(|r| r.type_token.as_str());
        let recorded = prior
            .into_iter()
            .flat_map(|cp| cp.resources.iter())
            .filter(|r| r.custom)
            .map(|r| r.type_token.as_str());

        for type_token in desired.chain(recorded) {
            self.get(type_token)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("packages", &self.packages())
            .finish()
    }
}
