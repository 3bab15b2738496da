//! CLI command definitions using clap.
//!
//! The CLI inspects persisted state only:
//! - runs: list run records
//! - ledger: show a run's ledger history
//! - artifact / artifacts: read stored artifacts
//! - events: show the event log
//! - gc: purge a finished run's artifacts

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Ratchet - iteration control for self-improving agent loops
#[derive(Parser, Debug)]
#[command(name = "ratchet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute; lists runs when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List runs
    Runs {
        /// Filter by status (active, completed, failed, escalated, exhausted)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show the ledger history of a run
    Ledger {
        /// Run ID
        run_id: String,

        /// Only entries of this step
        #[arg(short, long)]
        step: Option<String>,
    },

    /// Print one artifact revision
    Artifact {
        /// Namespace, e.g. runs/<run-id>
        namespace: String,

        /// Artifact name
        name: String,

        /// Revision to read (latest when omitted)
        #[arg(short, long)]
        revision: Option<u64>,
    },

    /// List the latest revision of every artifact in a namespace
    Artifacts {
        /// Namespace, e.g. runs/<run-id>
        namespace: String,
    },

    /// Show recorded events
    Events {
        /// Only events of this run
        #[arg(short, long)]
        run: Option<String>,
    },

    /// Purge the artifacts of a finished run
    Gc {
        /// Run ID
        run_id: String,
    },

    /// Print the effective configuration
    Config,
}
