//! shardcore - execution and placement-consistency core of a sharded data node
//!
//! - `placement`: per-database placement cache, migration critical section,
//!   version checks and metadata refresh coordination
//! - `executor`: resumable plan execution with bounded internal retries
//! - `observability`: structured logs and counters
//! - `config`: node configuration

pub mod cli;
pub mod config;
pub mod executor;
pub mod observability;
pub mod placement;
