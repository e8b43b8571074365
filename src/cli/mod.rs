//! Command-line interface: argument parsing and command handlers.

pub mod args;
pub mod commands;

pub use args::{AnalyzeArgs, Cli, Commands, ConfigCommand, KeyCommand, ProviderCommand};
pub use commands::execute;
