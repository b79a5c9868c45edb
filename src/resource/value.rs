//! Property values carried in resource input and output bags.
//!
//! Values serialize to plain JSON. Two object shapes are reserved:
//! `{"$ref": "<urn>", "property": "<name>"}` is a reference to another
//! resource's output (the physical ID when `property` is absent), and
//! `{"$secret": <value>}` wraps a value that must not be displayed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::urn::Urn;

/// Key marking a reference object.
pub const REF_KEY: &str = "$ref";

/// Key naming the referenced output property.
pub const REF_PROPERTY_KEY: &str = "property";

/// Key marking a secret object.
pub const SECRET_KEY: &str = "$secret";

/// Input or output property bag.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum PropertyValue {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(f64),
    /// String.
    String(String),
    /// Ordered list.
    List(Vec<PropertyValue>),
    /// Nested object.
    Object(PropertyMap),
    /// Unresolved reference to another resource's output.
    Reference {
        /// Resource producing the value.
        urn: Urn,
        /// Output property; `None` refers to the physical ID.
        property: Option<String>,
    },
    /// Value that must be masked when displayed.
    Secret(Box<PropertyValue>),
}

impl PropertyValue {
    /// Creates a reference to an output property of another resource.
    #[must_use]
    pub fn output(urn: &Urn, property: &str) -> Self {
        Self::Reference {
            urn: urn.clone(),
            property: Some(property.to_string()),
        }
    }

    /// Creates a reference to the physical ID of another resource.
    #[must_use]
    pub fn id_of(urn: &Urn) -> Self {
        Self::Reference {
            urn: urn.clone(),
            property: None,
        }
    }

    /// Returns the string content, looking through secrets.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Secret(inner) => inner.as_str(),
            _ => None,
        }
    }

    /// The value with every secret wrapper removed, for handing to a
    /// provider's backend.
    #[must_use]
    pub fn revealed(&self) -> Self {
        match self {
            Self::Secret(inner) => inner.revealed(),
            Self::List(items) => Self::List(items.iter().map(Self::revealed).collect()),
            Self::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.revealed()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Returns true if the value contains no unresolved references.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        match self {
            Self::Reference { .. } => false,
            Self::List(items) => items.iter().all(Self::is_resolved),
            Self::Object(map) => map.values().all(Self::is_resolved),
            Self::Secret(inner) => inner.is_resolved(),
            _ => true,
        }
    }

    /// Collects every URN referenced anywhere in this value.
    pub fn collect_references(&self, into: &mut BTreeSet<Urn>) {
        match self {
            Self::Reference { urn, .. } => {
                into.insert(urn.clone());
            }
            Self::List(items) => items.iter().for_each(|v| v.collect_references(into)),
            Self::Object(map) => map.values().for_each(|v| v.collect_references(into)),
            Self::Secret(inner) => inner.collect_references(into),
            _ => {}
        }
    }

    /// Replaces references with the values returned by `lookup`.
    ///
    /// References for which `lookup` returns `None` are left in place, so a
    /// partially known bag can still be compared during planning.
    #[must_use]
    pub fn resolve_with<F>(&self, lookup: &F) -> Self
    where
        F: Fn(&Urn, Option<&str>) -> Option<Self>,
    {
        match self {
            Self::Reference { urn, property } => {
                lookup(urn, property.as_deref()).unwrap_or_else(|| self.clone())
            }
            Self::List(items) => Self::List(items.iter().map(|v| v.resolve_with(lookup)).collect()),
            Self::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.resolve_with(lookup)))
                    .collect(),
            ),
            Self::Secret(inner) => Self::Secret(Box::new(inner.resolve_with(lookup))),
            other => other.clone(),
        }
    }

    /// Converts a JSON value, recognising reference and secret objects.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference object carries an invalid URN.
    pub fn from_json(value: Value) -> Result<Self, String> {
        Ok(match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or_default()),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(mut map) => {
                if let Some(Value::String(urn)) = map.get(REF_KEY) {
                    let urn = Urn::parse(urn).map_err(|e| e.to_string())?;
                    let property = map
                        .get(REF_PROPERTY_KEY)
                        .and_then(Value::as_str)
                        .map(String::from);
                    return Ok(Self::Reference { urn, property });
                }
                if map.len() == 1
                    && let Some(inner) = map.remove(SECRET_KEY)
                {
                    return Ok(Self::Secret(Box::new(Self::from_json(inner)?)));
                }
                Self::Object(
                    map.into_iter()
                        .map(|(k, v)| Self::from_json(v).map(|v| (k, v)))
                        .collect::<Result<_, _>>()?,
                )
            }
        })
    }
}

impl TryFrom<Value> for PropertyValue {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(value)
    }
}

impl From<PropertyValue> for Value {
    fn from(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Null => Self::Null,
            PropertyValue::Bool(b) => Self::Bool(b),
            PropertyValue::Number(n) => Number::from_f64(n).map_or(Self::Null, Self::Number),
            PropertyValue::String(s) => Self::String(s),
            PropertyValue::List(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            PropertyValue::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
            PropertyValue::Reference { urn, property } => {
                let mut map = Map::new();
                map.insert(REF_KEY.to_string(), Self::String(urn.into()));
                if let Some(property) = property {
                    map.insert(REF_PROPERTY_KEY.to_string(), Self::String(property));
                }
                Self::Object(map)
            }
            PropertyValue::Secret(inner) => {
                let mut map = Map::new();
                map.insert(SECRET_KEY.to_string(), Self::from(*inner));
                Self::Object(map)
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for PropertyValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Self::Reference { urn, property } => match property {
                Some(p) => write!(f, "<{}.{p}>", urn.name()),
                None => write!(f, "<{}.id>", urn.name()),
            },
            Self::Secret(_) => write!(f, "[secret]"),
        }
    }
}

/// Returns the sorted keys whose values differ between two bags.
#[must_use]
pub fn diff_keys(old: &PropertyMap, new: &PropertyMap) -> Vec<String> {
    old.keys()
        .chain(new.keys())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|k| old.get(*k) != new.get(*k))
        .cloned()
        .collect()
}

/// Overwrites ignored keys in `new` with their values from `old`.
///
/// A key ignored but absent from `old` is removed from `new`.
pub fn apply_ignore_changes(new: &mut PropertyMap, old: &PropertyMap, ignore: &[String]) {
    for key in ignore {
        match old.get(key) {
            Some(value) => {
                new.insert(key.clone(), value.clone());
            }
            None => {
                new.remove(key);
            }
        }
    }
}

/// Collects every URN referenced from a property bag.
#[must_use]
pub fn references(map: &PropertyMap) -> BTreeSet<Urn> {
    let mut urns = BTreeSet::new();
    for value in map.values() {
        value.collect_references(&mut urns);
    }
    urns
}
