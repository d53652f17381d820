//! CLI module for hotdesk - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
