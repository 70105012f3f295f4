//! CLI module for athena - command-line interface and subcommands.
//!
//! Provides the reconciliation loop entry point plus a few operator commands
//! for seeding and inspecting the job store.

pub mod commands;

pub use commands::Cli;
