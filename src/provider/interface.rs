//! The capability interface every resource provider implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::resource::{PropertyMap, Urn, diff_keys};

/// Result of asking a provider how a resource would change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffChanges {
    /// Nothing the provider cares about changed.
    None,
    /// The resource can be changed in place.
    Update {
        /// Changed input keys.
        keys: Vec<String>,
    },
    /// The resource must be recreated.
    Replace {
        /// Keys that force the replacement.
        keys: Vec<String>,
    },
}

/// Response to a successful create.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateResponse {
    /// Physical ID of the new resource.
    pub id: String,
    /// Outputs reported by the provider.
    pub outputs: PropertyMap,
}

/// Response to a successful read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponse {
    /// Physical ID of the resource.
    pub id: String,
    /// Current outputs.
    pub outputs: PropertyMap,
}

/// A resource provider.
///
/// Providers receive fully resolved inputs. They classify their own failures:
/// return [`crate::error::ProviderError::Transient`] for anything worth
/// retrying and [`crate::error::ProviderError::Terminal`] otherwise.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Package name this provider serves.
    fn name(&self) -> &'static str;

    /// Compares recorded inputs with new inputs.
    ///
    /// The default reports an in-place update of every changed key.
    async fn diff(
        &self,
        urn: &Urn,
        id: &str,
        old: &PropertyMap,
        new: &PropertyMap,
    ) -> ProviderResult<DiffChanges> {
        let _ = (urn, id);
        let keys = diff_keys(old, new);
        Ok(if keys.is_empty() {
            DiffChanges::None
        } else {
            DiffChanges::Update { keys }
        })
    }

    /// Creates a physical resource.
    async fn create(&self, urn: &Urn, inputs: &PropertyMap) -> ProviderResult<CreateResponse>;

    /// Reads an existing physical resource.
    async fn read(&self, urn: &Urn, id: &str, inputs: &PropertyMap) -> ProviderResult<ReadResponse>;

    /// Updates a resource in place and returns its new outputs.
    async fn update(
        &self,
        urn: &Urn,
        id: &str,
        old: &PropertyMap,
        new: &PropertyMap,
    ) -> ProviderResult<PropertyMap>;

    /// Deletes a physical resource.
    async fn delete(&self, urn: &Urn, id: &str, inputs: &PropertyMap) -> ProviderResult<()>;
}

impl DiffChanges {
    /// Returns true if the resource must be recreated.
    #[must_use]
    pub const fn is_replace(&self) -> bool {
        matches!(self, Self::Replace { .. })
    }

    /// Keys reported as changed.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        match self {
            Self::None => &[],
            Self::Update { keys } | Self::Replace { keys } => keys,
        }
    }
}
