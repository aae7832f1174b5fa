//! CLI argument definitions using clap
//!
//! Commands:
//! - shardcore check-config --config <path>
//! - shardcore check-version (request on stdin)

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// shardcore - placement consistency and executor lifecycle diagnostics
#[derive(Parser, Debug)]
#[command(name = "shardcore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and validate a node configuration, print the effective settings
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./shardcore.json")]
        config: PathBuf,
    },

    /// Evaluate one received version against a described node state.
    /// Reads a single JSON request from stdin.
    CheckVersion,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
