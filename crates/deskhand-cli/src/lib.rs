//! CLI argument models and resolution helpers for the deskhand binary.

pub mod cli_args;

pub use cli_args::Cli;
