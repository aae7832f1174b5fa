//! CLI module for shardcore
//!
//! Provides command-line diagnostics for:
//! - check-config: Validate a node configuration
//! - check-version: Evaluate a received version against a described state

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{
    check_config, check_version, run, run_command, RequestedIntent, RequestedPhase,
    VersionCheckRequest,
};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_request, read_stdin_request, write_json};
