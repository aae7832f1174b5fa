//! JSON I/O handling for CLI
//!
//! - Input: single JSON object via stdin
//! - Output: single JSON object via stdout

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::errors::{CliError, CliResult};

/// Read one JSON request from `input`
pub fn read_request<T: DeserializeOwned>(mut input: impl Read) -> CliResult<T> {
    let mut content = String::new();
    input.read_to_string(&mut content)?;

    if content.trim().is_empty() {
        return Err(CliError::invalid_request("Empty input"));
    }

    Ok(serde_json::from_str(&content)?)
}

/// Read one JSON request from stdin
pub fn read_stdin_request<T: DeserializeOwned>() -> CliResult<T> {
    read_request(io::stdin().lock())
}

/// Write a JSON value to stdout, one line
pub fn write_json(value: &Value) -> CliResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", value)?;
    handle.flush()?;
    Ok(())
}
