//! Resource providers.
//!
//! A provider owns the lifecycle of one package of resource types. The engine
//! reaches providers only through the [`ProviderGateway`], which picks the
//! provider by the package segment of a type token and applies retries and
//! timeouts.

pub mod builtin;
mod gateway;
mod interface;
mod registry;

pub use gateway::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_STEP_TIMEOUT_SECS, ProviderGateway, RetryPolicy, StepOutcome,
};
pub use interface::{CreateResponse, DiffChanges, Provider, ReadResponse};
pub use registry::ProviderRegistry;
