//! CLI module for warden - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for running the
//! supervisor and inspecting configuration discovery.

pub mod commands;

pub use commands::Cli;
