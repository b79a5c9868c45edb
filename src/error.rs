//! Error types for the Strata deployment engine.
//!
//! This module provides the error hierarchy for every stage of a deployment:
//! configuration, graph construction, state management, provider calls,
//! planning, and step execution.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Strata deployment engine.
#[derive(Debug, Error)]
pub enum StrataError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Deployment execution errors.
    #[error("Deployment error: {0}")]
    Deploy(#[from] DeployError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A resource references a name that is not declared.
    #[error("Unknown resource reference '{name}' in {resource}")]
    UnknownReference {
        /// Resource holding the reference.
        resource: String,
        /// The name that could not be resolved.
        name: String,
    },

    /// No provider is registered for a resource type's package.
    #[error("No provider registered for package '{package}' (type {type_token})")]
    UnknownProvider {
        /// Package segment of the type token.
        package: String,
        /// Full type token.
        type_token: String,
    },
}

/// Resource graph errors. All of them are fatal before any step runs.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Two registrations produced the same URN.
    #[error("Duplicate resource URN: {urn}")]
    DuplicateUrn {
        /// The duplicated URN.
        urn: String,
    },

    /// A child was registered before its parent.
    #[error("Parent {parent} of {urn} is not registered")]
    UnknownParent {
        /// URN of the child.
        urn: String,
        /// URN of the missing parent.
        parent: String,
    },

    /// A dependency edge points at a resource that was never registered.
    #[error("Resource {from} depends on unregistered resource {to}")]
    DanglingDependency {
        /// Dependent resource.
        from: String,
        /// Missing dependency.
        to: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    Cycle {
        /// URNs along the cycle, first element repeated at the end.
        cycle: Vec<String>,
    },

    /// A URN string could not be parsed.
    #[error("Invalid URN '{urn}': {reason}")]
    InvalidUrn {
        /// The malformed URN.
        urn: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A type token is not of the form `package:module:Type`.
    #[error("Invalid type token '{token}'")]
    InvalidTypeToken {
        /// The malformed token.
        token: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted. Never recovered automatically.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Writing state to the backend failed.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State was written by a newer engine.
    #[error("State version mismatch: engine supports up to {supported}, found {found}")]
    VersionMismatch {
        /// Newest version this engine reads.
        supported: u32,
        /// Version found in the state.
        found: u32,
    },

    /// The checkpoint belongs to a different stack.
    #[error("Checkpoint belongs to {found}, expected {expected}")]
    StackMismatch {
        /// Stack the engine is deploying.
        expected: String,
        /// Stack recorded in the checkpoint.
        found: String,
    },
}

/// Errors returned by providers, classified for retry decisions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Temporary failure (timeout, throttling). Retried with backoff.
    #[error("transient provider failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
    },

    /// Permanent failure (invalid input, permission denied). Never retried.
    #[error("provider failure: {message}")]
    Terminal {
        /// Description of the failure.
        message: String,
    },

    /// The physical resource does not exist.
    #[error("resource {id} not found")]
    NotFound {
        /// Physical ID that was looked up.
        id: String,
    },

    /// The call did not finish within the per-step timeout.
    #[error("provider call timed out after {secs}s")]
    Timeout {
        /// Timeout that elapsed, in seconds.
        secs: u64,
    },

    /// All retry attempts failed with transient errors.
    #[error("gave up after {attempts} attempts: {message}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Message of the last failure.
        message: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A protected resource would be deleted or replaced.
    #[error("Resource {urn} is protected and cannot be {operation}; unprotect it or allow protected changes")]
    ProtectedResource {
        /// URN of the protected resource.
        urn: String,
        /// Operation that was refused.
        operation: String,
    },

    /// The step graph could not be ordered.
    #[error("Failed to resolve step dependencies: {message}")]
    DependencyResolutionFailed {
        /// Description of the dependency issue.
        message: String,
    },
}

/// Errors raised while executing a plan.
#[derive(Debug, Error)]
pub enum DeployError {
    /// An input references an output that was never produced.
    #[error("Unresolved reference to {urn}{}", .property.as_ref().map(|p| format!(".{p}")).unwrap_or_default())]
    UnresolvedReference {
        /// URN of the referenced resource.
        urn: String,
        /// Referenced output property, `None` for the physical ID.
        property: Option<String>,
    },

    /// A resource's outputs were produced twice in one deployment.
    #[error("Outputs for {urn} were already resolved")]
    OutputAlreadyResolved {
        /// URN of the resource.
        urn: String,
    },

    /// A worker task panicked or was aborted.
    #[error("Step worker failed: {message}")]
    WorkerFailed {
        /// Description of the failure.
        message: String,
    },
}

/// Result type alias for Strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Result type alias for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

impl StrataError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }

    /// Returns true for errors detected before any step executes.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Graph(_) | Self::Plan(_)
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates a terminal error.
    #[must_use]
    pub fn terminal(message: impl Into<String>) -> Self {
        Self::Terminal {
            message: message.into(),
        }
    }

    /// Returns true if the call may succeed when retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout { .. })
    }

    /// Classifies an IO error from a local provider.
    #[must_use]
    pub fn from_io(context: &str, err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                Self::transient(format!("{context}: {err}"))
            }
            _ => Self::terminal(format!("{context}: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = GraphError::Cycle {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_provider_retryable() {
        assert!(ProviderError::transient("throttled").is_retryable());
        assert!(ProviderError::Timeout { secs: 5 }.is_retryable());
        assert!(!ProviderError::terminal("denied").is_retryable());
        assert!(!ProviderError::NotFound { id: "x".into() }.is_retryable());
    }

    #[test]
    fn test_io_classification() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(ProviderError::from_io("write", &timed_out).is_retryable());

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(!ProviderError::from_io("write", &denied).is_retryable());
    }

    #[test]
    fn test_configuration_errors() {
        let err = StrataError::from(GraphError::DuplicateUrn { urn: "u".into() });
        assert!(err.is_configuration_error());
        let err = StrataError::from(ProviderError::terminal("x"));
        assert!(!err.is_configuration_error());
    }
}
