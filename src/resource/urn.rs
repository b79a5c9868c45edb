//! Resource identifiers.
//!
//! A URN has the shape `urn:strata:<stack>::<project>::<qualified-type>::<name>`,
//! where the qualified type is the resource's own type token prefixed with the
//! type tokens of its parent chain, joined by `$`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::GraphError;

/// URN prefix.
const URN_PREFIX: &str = "urn:strata:";

/// Separator between URN components.
const URN_SEPARATOR: &str = "::";

/// Separator between parent types in a qualified type.
const TYPE_SEPARATOR: char = '$';

/// Unique resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Urn(String);

impl Urn {
    /// Builds the URN for a resource.
    #[must_use]
    pub fn new(
        stack: &str,
        project: &str,
        parent: Option<&Self>,
        type_token: &str,
        name: &str,
    ) -> Self {
        let qualified_type = parent.map_or_else(
            || type_token.to_string(),
            |p| format!("{}{TYPE_SEPARATOR}{type_token}", p.qualified_type()),
        );

        Self(format!(
            "{URN_PREFIX}{stack}{URN_SEPARATOR}{project}{URN_SEPARATOR}{qualified_type}{URN_SEPARATOR}{name}"
        ))
    }

    /// Parses and validates a URN string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a well-formed URN.
    pub fn parse(s: &str) -> Result<Self, GraphError> {
        let invalid = |reason: &str| GraphError::InvalidUrn {
            urn: s.to_string(),
            reason: reason.to_string(),
        };

        let rest = s
            .strip_prefix(URN_PREFIX)
            .ok_or_else(|| invalid("missing 'urn:strata:' prefix"))?;

        let parts: Vec<&str> = rest.splitn(4, URN_SEPARATOR).collect();
        if parts.len() != 4 {
            return Err(invalid("expected stack::project::type::name"));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty component"));
        }

        Ok(Self(s.to_string()))
    }

    /// Returns the URN as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn component(&self, index: usize) -> &str {
        self.0
            .strip_prefix(URN_PREFIX)
            .and_then(|rest| rest.splitn(4, URN_SEPARATOR).nth(index))
            .unwrap_or_default()
    }

    /// Stack component.
    #[must_use]
    pub fn stack(&self) -> &str {
        self.component(0)
    }

    /// Project component.
    #[must_use]
    pub fn project(&self) -> &str {
        self.component(1)
    }

    /// Type including the parent chain.
    #[must_use]
    pub fn qualified_type(&self) -> &str {
        self.component(2)
    }

    /// The resource's own type token.
    #[must_use]
    pub fn type_token(&self) -> &str {
        let qualified = self.qualified_type();
        qualified
            .rsplit_once(TYPE_SEPARATOR)
            .map_or(qualified, |(_, own)| own)
    }

    /// Resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.component(3)
    }
}

impl TryFrom<String> for Urn {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s).map_err(|e| e.to_string())
    }
}

impl From<Urn> for String {
    fn from(urn: Urn) -> Self {
        urn.0
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns the package segment of a `package:module:Type` token.
///
/// # Errors
///
/// Returns an error if the token does not have three non-empty segments.
pub fn package_of(type_token: &str) -> Result<&str, GraphError> {
    let segments: Vec<&str> = type_token.split(':').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(GraphError::InvalidTypeToken {
            token: type_token.to_string(),
        });
    }
    Ok(segments[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urn_components() {
        let urn = Urn::new("dev", "web", None, "file:index:File", "index");
        assert_eq!(urn.as_str(), "urn:strata:dev::web::file:index:File::index");
        assert_eq!(urn.stack(), "dev");
        assert_eq!(urn.project(), "web");
        assert_eq!(urn.type_token(), "file:index:File");
        assert_eq!(urn.name(), "index");
    }

    #[test]
    fn test_parent_chain_in_type() {
        let parent = Urn::new("dev", "web", None, "app:index:Site", "site");
        let child = Urn::new("dev", "web", Some(&parent), "file:index:File", "index");
        assert_eq!(child.qualified_type(), "app:index:Site$file:index:File");
        assert_eq!(child.type_token(), "file:index:File");

        // Same name under a different parent is a different resource.
        let top = Urn::new("dev", "web", None, "file:index:File", "index");
        assert_ne!(child, top);
    }

    #[test]
    fn test_parse() {
        let urn = Urn::parse("urn:strata:dev::web::file:index:File::a::b").unwrap();
        assert_eq!(urn.name(), "a::b");
        assert!(Urn::parse("urn:other:dev::web::t::n").is_err());
        assert!(Urn::parse("urn:strata:dev::web::t").is_err());
        assert!(Urn::parse("urn:strata:dev::::t::n").is_err());
    }

    #[test]
    fn test_serde_validates() {
        let ok: Result<Urn, _> = serde_json::from_str("\"urn:strata:s::p::a:b:C::n\"");
        assert!(ok.is_ok());
        let bad: Result<Urn, _> = serde_json::from_str("\"bucket\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_package_of() {
        assert_eq!(package_of("command:local:Command").unwrap(), "command");
        assert!(package_of("command").is_err());
        assert!(package_of("a::B").is_err());
    }
}
