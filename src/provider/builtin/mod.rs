//! Providers shipped with the engine.

mod command;
mod file;

pub use command::CommandProvider;
pub use file::FileProvider;
