//! CLI command implementations
//!
//! Diagnostics only. Nothing here holds state beyond one invocation.

use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::ShardingConfig;
use crate::placement::{
    check_version_or_throw, AccessIntent, CachedPlacementInfo, CriticalSectionController,
    ReceivedVersion, ShardIdentity, Timestamp, VersionCache,
};

use super::args::{Cli, Command};
use super::errors::CliResult;
use super::io::{read_stdin_request, write_json};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    run_command(cli.command)
}

/// Dispatch a parsed command
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::CheckConfig { config } => {
            let summary = check_config(&config)?;
            write_json(&summary)
        }
        Command::CheckVersion => {
            let request: VersionCheckRequest = read_stdin_request()?;
            write_json(&check_version(&request))
        }
    }
}

/// Load and validate a configuration file; return the effective settings.
pub fn check_config(config_path: &Path) -> CliResult<Value> {
    let config = ShardingConfig::load(config_path)?;
    let identity = config.shard_identity();
    let policy = config.yield_policy();

    Ok(json!({
        "ok": true,
        "shard_id": identity.shard_id().as_str(),
        "cluster_role": config.cluster_role.as_str(),
        "sharding_enabled": identity.is_enabled(),
        "executor_max_wait_ms": policy.max_wait().as_millis() as u64,
        "write_conflict_backoff_ms": policy.backoff().as_millis() as u64,
    }))
}

/// Phase named in a `check-version` request.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedPhase {
    #[default]
    Idle,
    CatchUp,
    Commit,
}

/// Intent named in a `check-version` request.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedIntent {
    #[default]
    Read,
    Write,
}

/// A described node state plus one received version.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionCheckRequest {
    pub db: String,
    #[serde(default)]
    pub cached: Option<CachedPlacementInfo>,
    #[serde(default)]
    pub critical_section: RequestedPhase,
    pub received: ReceivedVersion,
    #[serde(default)]
    pub at_cluster_time: Option<Timestamp>,
    #[serde(default)]
    pub intent: RequestedIntent,
}

/// Evaluate the request with the same checker every read and write path uses.
pub fn check_version(request: &VersionCheckRequest) -> Value {
    let mut cache = VersionCache::new();
    if let Some(info) = &request.cached {
        cache.set(info.clone());
    }

    let mut critical_section = CriticalSectionController::new(request.db.clone());
    let reason = json!({"command": "check-version"});
    let entered = match request.critical_section {
        RequestedPhase::Idle => Ok(()),
        RequestedPhase::CatchUp => critical_section.enter_catch_up(reason),
        RequestedPhase::Commit => critical_section
            .enter_catch_up(reason.clone())
            .and_then(|_| critical_section.enter_commit(&reason)),
    };
    if let Err(err) = entered {
        return json!({"ok": false, "code": err.code(), "message": err.to_string()});
    }

    let intent = match request.intent {
        RequestedIntent::Read => AccessIntent::Read,
        RequestedIntent::Write => AccessIntent::Write,
    };

    match check_version_or_throw(
        &request.db,
        &request.received,
        &cache,
        &critical_section,
        intent,
        request.at_cluster_time,
    ) {
        Ok(()) => json!({"ok": true}),
        Err(err) => {
            let mut response = json!({
                "ok": false,
                "code": err.code(),
                "message": err.to_string(),
                "retryable": err.is_retryable(),
            });
            if let Some(info) = err.stale_info() {
                response["should_wait"] = json!(info.should_wait());
                response["wanted"] = json!(info.wanted);
            }
            response
        }
    }
}
