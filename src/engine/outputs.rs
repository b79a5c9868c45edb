//! Resolved outputs of the resources in a running deployment.

use std::collections::HashMap;

use crate::error::DeployError;
use crate::resource::{PropertyMap, PropertyValue, ResourceState, Urn};

/// Outputs of one resource, filled once.
#[derive(Debug, Clone, PartialEq)]
struct Resolved {
    id: Option<String>,
    inputs: PropertyMap,
    outputs: PropertyMap,
}

/// Table of resolved resource outputs, owned by the scheduler.
///
/// Each URN is filled exactly once per deployment: from the recorded state
/// for unchanged resources, or when the producing step completes.
#[derive(Debug, Default)]
pub struct OutputTable {
    slots: HashMap<Urn, Resolved>,
}

impl OutputTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills the slot of an unchanged resource from its recorded state.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot is already filled.
    pub fn seed(&mut self, state: &ResourceState) -> Result<(), DeployError> {
        self.resolve(
            &state.urn,
            state.id.clone(),
            state.inputs.clone(),
            state.outputs.clone(),
        )
    }

    /// Fills the slot of a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot is already filled.
    pub fn resolve(
        &mut self,
        urn: &Urn,
        id: Option<String>,
        inputs: PropertyMap,
        outputs: PropertyMap,
    ) -> Result<(), DeployError> {
        if self.slots.contains_key(urn) {
            return Err(DeployError::OutputAlreadyResolved {
                urn: urn.to_string(),
            });
        }
        self.slots.insert(urn.clone(), Resolved { id, inputs, outputs });
        Ok(())
    }

    /// Returns true if the resource's outputs are known.
    #[must_use]
    pub fn is_resolved(&self, urn: &Urn) -> bool {
        self.slots.contains_key(urn)
    }

    /// Looks up an output, or the physical ID when `property` is `None`.
    ///
    /// Outputs fall back to inputs, so components expose what they were
    /// given.
    #[must_use]
    pub fn lookup(&self, urn: &Urn, property: Option<&str>) -> Option<PropertyValue> {
        let slot = self.slots.get(urn)?;
        match property {
            None => slot.id.clone().map(PropertyValue::String),
            Some(p) => slot
                .outputs
                .get(p)
                .or_else(|| slot.inputs.get(p))
                .cloned(),
        }
    }

    /// Replaces every reference in `inputs` with its resolved value.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first reference that cannot be resolved.
    pub fn resolve_inputs(&self, inputs: &PropertyMap) -> Result<PropertyMap, DeployError> {
        let lookup = |urn: &Urn, property: Option<&str>| self.lookup(urn, property);
        let resolved: PropertyMap = inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.resolve_with(&lookup)))
            .collect();

        match resolved.values().find_map(first_reference) {
            Some((urn, property)) => Err(DeployError::UnresolvedReference {
                urn: urn.to_string(),
                property: property.map(String::from),
            }),
            None => Ok(resolved),
        }
    }
}

fn first_reference(value: &PropertyValue) -> Option<(&Urn, Option<&str>)> {
    match value {
        PropertyValue::Reference { urn, property } => Some((urn, property.as_deref())),
        PropertyValue::List(items) => items.iter().find_map(first_reference),
        PropertyValue::Object(map) => map.values().find_map(first_reference),
        PropertyValue::Secret(inner) => first_reference(inner),
        _ => None,
    }
}
