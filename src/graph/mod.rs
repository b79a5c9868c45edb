//! Resource dependency graph.
//!
//! The [`GraphBuilder`] consumes registrations in program order, infers
//! dependencies from input references, and on finalize rejects dangling
//! edges and cycles before anything is planned.

mod builder;
mod dag;

pub use builder::GraphBuilder;
pub use dag::ResourceGraph;
