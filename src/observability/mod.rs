//! Observability: structured logging and counters
//!
//! - Structured JSON logs, one line per event
//! - Typed event vocabulary
//! - Monotonic counters
//!
//! Observability is read-only. Nothing here may change the outcome of a
//! placement check or an executor transition.

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Component, Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log a typed event at its default severity.
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.component(), event.severity(), event.as_str(), fields);
}

/// Log a typed event at an explicit severity.
pub fn log_event_at(event: Event, severity: Severity, fields: &[(&str, &str)]) {
    Logger::log(event.component(), severity, event.as_str(), fields);
}
