//! Structured JSON logger
//!
//! - One log line = one event
//! - `event` first, then `severity`, then `component`, then fields sorted by key
//! - Synchronous, no buffering
//! - INFO/WARN/TRACE go to stdout, ERROR/FATAL go to stderr

use std::fmt;
use std::io::{self, Write};

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Debug-level detail
    Trace = 0,
    /// Normal operations
    Info = 1,
    /// Recoverable issues
    Warn = 2,
    /// Operation failures
    Error = 3,
    /// Contract violation, the caller is expected to abort
    Fatal = 4,
}

impl Severity {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    fn uses_stderr(&self) -> bool {
        *self >= Severity::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subsystem that emitted a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// Placement cache, critical section and refresh bookkeeping
    Sharding,
    /// Plan executor lifecycle
    Executor,
    /// Startup and configuration
    Control,
}

impl Component {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Sharding => "sharding",
            Component::Executor => "executor",
            Component::Control => "control",
        }
    }
}

/// A structured logger that outputs JSON lines
pub struct Logger;

impl Logger {
    /// Log an event with the given severity and fields.
    pub fn log(component: Component, severity: Severity, event: &str, fields: &[(&str, &str)]) {
        let line = Self::render(component, severity, event, fields);
        if severity.uses_stderr() {
            Self::write_line(&line, &mut io::stderr());
        } else {
            Self::write_line(&line, &mut io::stdout());
        }
    }

    /// Render one log line, including the trailing newline.
    pub(crate) fn render(
        component: Component,
        severity: Severity,
        event: &str,
        fields: &[(&str, &str)],
    ) -> String {
        let mut output = String::with_capacity(192);

        output.push_str("{\"event\":");
        Self::push_json_string(&mut output, event);
        output.push_str(",\"severity\":\"");
        output.push_str(severity.as_str());
        output.push_str("\",\"component\":\"");
        output.push_str(component.as_str());
        output.push('"');

        let mut sorted: Vec<&(&str, &str)> = fields.iter().collect();
        sorted.sort_by_key(|(k, _)| *k);

        for (key, value) in sorted {
            output.push(',');
            Self::push_json_string(&mut output, key);
            output.push(':');
            Self::push_json_string(&mut output, value);
        }

        output.push_str("}\n");
        output
    }

    fn push_json_string(output: &mut String, s: &str) {
        match serde_json::to_string(s) {
            Ok(quoted) => output.push_str(&quoted),
            Err(_) => output.push_str("\"\""),
        }
    }

    fn write_line<W: Write>(line: &str, writer: &mut W) {
        // Logging must never fail the caller
        let _ = writer.write_all(line.as_bytes());
        let _ = writer.flush();
    }
}
