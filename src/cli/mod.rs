//! CLI module for ratchet - command-line interface and subcommands.
//!
//! Provides read-only inspection of runs, ledger entries, artifacts and
//! events, plus garbage collection of finished runs.

pub mod commands;

pub use commands::Cli;
