//! CLI module for the Strata deployment tool.
//!
//! This module provides the command-line interface for previewing,
//! deploying, and destroying stacks.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
