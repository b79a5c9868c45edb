//! Resource model: identifiers, property values, and resource records.
//!
//! Resources are declared by the program as [`ResourceRegistration`]s, become
//! [`DesiredResource`]s once the graph builder has validated them, and are
//! recorded as [`ResourceState`] in the checkpoint after a provider call.

mod model;
mod urn;
mod value;

pub use model::{DesiredResource, ResourceOptions, ResourceRegistration, ResourceState};
pub use urn::{package_of, Urn};
pub use value::{
    apply_ignore_changes, diff_keys, references, PropertyMap, PropertyValue, REF_KEY,
    REF_PROPERTY_KEY, SECRET_KEY,
};
