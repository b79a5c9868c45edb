//! Resource declarations and recorded resource state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::urn::Urn;
use super::value::{PropertyMap, PropertyValue};

/// Per-resource options that influence planning and deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceOptions {
    /// Refuse to delete or replace this resource.
    pub protect: bool,
    /// Delete the old resource before creating its replacement.
    pub delete_before_replace: bool,
    /// Input keys excluded from change detection.
    pub ignore_changes: Vec<String>,
    /// Input keys whose change always forces a replacement.
    pub replace_on_changes: Vec<String>,
    /// Drop the resource from state on delete without calling the provider.
    pub retain_on_delete: bool,
    /// Adopt an existing physical resource with this ID instead of creating one.
    pub import_id: Option<String>,
}

/// A resource registration as produced by the program evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRegistration {
    /// Type token (`package:module:Type`).
    pub type_token: String,
    /// Resource name, unique among siblings of the same type.
    pub name: String,
    /// Parent resource.
    pub parent: Option<Urn>,
    /// Whether a provider manages this resource (false for components).
    pub custom: bool,
    /// Declared inputs, possibly containing references.
    pub inputs: PropertyMap,
    /// Explicit dependencies.
    pub depends_on: Vec<Urn>,
    /// Resource options.
    pub options: ResourceOptions,
}

impl ResourceRegistration {
    /// Creates a registration for a provider-managed resource.
    #[must_use]
    pub fn new(type_token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_token: type_token.into(),
            name: name.into(),
            parent: None,
            custom: true,
            inputs: PropertyMap::new(),
            depends_on: Vec::new(),
            options: ResourceOptions::default(),
        }
    }

    /// Creates a registration for a component resource.
    #[must_use]
    pub fn component(type_token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            custom: false,
            ..Self::new(type_token, name)
        }
    }

    /// Sets the parent resource.
    #[must_use]
    pub fn with_parent(mut self, parent: &Urn) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Adds an input property.
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn depends_on(mut self, urn: &Urn) -> Self {
        self.depends_on.push(urn.clone());
        self
    }

    /// Replaces the resource options.
    #[must_use]
    pub fn with_options(mut self, options: ResourceOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the protect flag.
    #[must_use]
    pub const fn protect(mut self, protect: bool) -> Self {
        self.options.protect = protect;
        self
    }
}

/// A validated resource in the desired graph.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredResource {
    /// Resource URN.
    pub urn: Urn,
    /// Type token.
    pub type_token: String,
    /// Parent resource.
    pub parent: Option<Urn>,
    /// Whether a provider manages this resource.
    pub custom: bool,
    /// Declared inputs, possibly containing references.
    pub inputs: PropertyMap,
    /// Every dependency: parent, explicit, and inferred from inputs.
    pub dependencies: Vec<Urn>,
    /// Resource options.
    pub options: ResourceOptions,
}

/// Recorded state of a deployed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource URN.
    pub urn: Urn,
    /// Type token.
    #[serde(rename = "type")]
    pub type_token: String,
    /// Whether a provider manages this resource.
    #[serde(default = "default_custom")]
    pub custom: bool,
    /// Physical ID assigned by the provider.
    #[serde(default)]
    pub id: Option<String>,
    /// Resolved inputs the resource was last deployed with.
    #[serde(default)]
    pub inputs: PropertyMap,
    /// Outputs reported by the provider.
    #[serde(default)]
    pub outputs: PropertyMap,
    /// Dependencies at the time of deployment.
    #[serde(default)]
    pub dependencies: Vec<Urn>,
    /// Parent resource.
    #[serde(default)]
    pub parent: Option<Urn>,
    /// Refuse to delete or replace.
    #[serde(default)]
    pub protect: bool,
    /// Replacement ordering preference.
    #[serde(default)]
    pub delete_before_replace: bool,
    /// Skip the provider on delete.
    #[serde(default)]
    pub retain_on_delete: bool,
    /// Old half of a create-before-delete replacement awaiting deletion.
    #[serde(default)]
    pub pending_replacement: bool,
    /// When the resource was first created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last modified.
    pub updated_at: DateTime<Utc>,
}

const fn default_custom() -> bool {
    true
}

impl ResourceState {
    /// Builds the state for a resource after a successful provider operation.
    ///
    /// `previous` carries the creation time forward for in-place changes.
    #[must_use]
    pub fn from_desired(
        desired: &DesiredResource,
        id: Option<String>,
        inputs: PropertyMap,
        outputs: PropertyMap,
        previous: Option<&Self>,
    ) -> Self {
        let now = Utc::now();
        Self {
            urn: desired.urn.clone(),
            type_token: desired.type_token.clone(),
            custom: desired.custom,
            id,
            inputs,
            outputs,
            dependencies: desired.dependencies.clone(),
            parent: desired.parent.clone(),
            protect: desired.options.protect,
            delete_before_replace: desired.options.delete_before_replace,
            retain_on_delete: desired.options.retain_on_delete,
            pending_replacement: false,
            created_at: previous.map_or(now, |p| p.created_at),
            updated_at: now,
        }
    }

    /// Looks up an output, falling back to inputs for components and
    /// providers that do not echo their inputs.
    #[must_use]
    pub fn output(&self, property: &str) -> Option<&PropertyValue> {
        self.outputs.get(property).or_else(|| self.inputs.get(property))
    }
}
