// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Strata Deploy
//!
//! A declarative deployment engine that converges a stack of resources to the
//! state described by a program, in dependency order, with crash-consistent
//! checkpoints.
//!
//! ## Overview
//!
//! A program registers resources. Strata turns them into a dependency graph,
//! compares the graph with the checkpoint of the previous deployment, and
//! executes the resulting plan:
//!
//! - Independent steps run concurrently, up to a parallelism limit
//! - A failed step only stops the steps that depend on it
//! - Every finished step is written to the checkpoint before anything
//!   downstream of it starts
//! - Deployments can be canceled, and running steps are allowed to finish
//!
//! ## Architecture
//!
//! 1. **Graph**: [`graph::GraphBuilder`] assigns URNs and rejects cycles
//! 2. **Diff**: [`planner::Differ`] classifies each resource against the
//!    checkpoint, asking its provider when inputs changed
//! 3. **Plan**: [`planner::DeploymentPlan`] is a DAG of steps, including the
//!    ordering of replacements
//! 4. **Execute**: [`engine::StepScheduler`] dispatches steps through the
//!    [`provider::ProviderGateway`] and records them through the
//!    [`engine::CheckpointWriter`]
//!
//! ## Modules
//!
//! - [`resource`]: URNs, property values, and resource records
//! - [`graph`]: Dependency graph construction and validation
//! - [`planner`]: Diff computation and step planning
//! - [`provider`]: Provider trait, registry, gateway, and builtin providers
//! - [`engine`]: Scheduling, output resolution, and checkpoint writing
//! - [`state`]: Checkpoint storage backends (local, memory)
//! - [`config`]: Program parsing and validation
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: demo
//!   stack: dev
//!
//! resources:
//!   - type: file:index:File
//!     name: config
//!     inputs:
//!       path: ./out/app.conf
//!       content: "listen 8080"
//!   - type: command:local:Command
//!     name: reload
//!     inputs:
//!       create: "cat ./out/app.conf"
//!       environment:
//!         CONFIG_SHA: { "$ref": config, property: sha256 }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod resource;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, ProgramConfig, ProgramHasher};
pub use engine::{Deployment, DeploymentResult, DeploymentStatus};
pub use error::{Result, StrataError};
pub use graph::{GraphBuilder, ResourceGraph};
pub use planner::{DeploymentPlan, Differ};
pub use provider::{Provider, ProviderGateway, ProviderRegistry};
pub use resource::{PropertyValue, ResourceRegistration, Urn};
pub use state::{Checkpoint, LocalStateStore, MemoryStateStore, StateStore};
