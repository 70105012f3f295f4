//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: reconcile offline launches until no work is left
//! - add: push a work item into the store
//! - status: print outstanding launches
//! - reset: clear the store
//! - block: create a datestamped launch block directory

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Athena - reconciles offline batch-queue launches against the job store
#[derive(Parser, Debug)]
#[command(name = "athena")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
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
    /// Submit ready work and reconcile offline launches
    Run {
        /// Keep polling after all work is done
        #[arg(short, long)]
        daemon: bool,
    },

    /// Add a work item to the store
    Add {
        /// Work item name
        name: String,

        /// Shell command run on the compute node
        #[arg(long)]
        command: String,

        /// Worker category allowed to run this item
        #[arg(long)]
        category: Option<String>,

        /// Work item ids that must complete first
        #[arg(short = 'd', long, num_args = 1..)]
        depends_on: Vec<u64>,

        /// Override the queue walltime for this item
        #[arg(long)]
        walltime: Option<String>,

        /// Override the node count for this item
        #[arg(long)]
        nnodes: Option<u32>,
    },

    /// Show outstanding launches and whether work is still active
    Status,

    /// Remove every work item and launch from the store
    Reset,

    /// Create a new block directory under the launch dir
    Block,
}
