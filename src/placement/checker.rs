//! Received-version validation
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. A critical section blocking the caller's intent → stale, with signal
//! 2. Nothing cached → stale, no cached info
//! 3. Cached version differs from received → stale, version mismatch
//! 4. Snapshot transactions older than the installed placement → conflict
//!
//! The decision is a pure function of its inputs. Nothing is remembered
//! between calls; the critical section and the cache can change between
//! any two checks.

use super::cache::VersionCache;
use super::context::AccessIntent;
use super::critical_section::CriticalSectionController;
use super::errors::{ShardingError, ShardingResult, StaleDbVersionInfo, StaleReason};
use super::version::{PlacementVersion, ReceivedVersion, Timestamp};

/// Validate `received` against the cached placement of `db`.
pub fn check_version_or_throw(
    db: &str,
    received: &ReceivedVersion,
    cache: &VersionCache,
    critical_section: &CriticalSectionController,
    intent: AccessIntent,
    at_cluster_time: Option<Timestamp>,
) -> ShardingResult<()> {
    if let Some(signal) = critical_section.signal(intent) {
        let section_reason = critical_section
            .reason()
            .map(|r| r.to_string())
            .unwrap_or_default();
        return Err(ShardingError::stale(StaleDbVersionInfo {
            db: db.to_string(),
            received: *received,
            wanted: None,
            critical_section_signal: Some(signal),
            reason: StaleReason::CriticalSectionActive { section_reason },
        }));
    }

    let cached = match cache.get() {
        Some(cached) => cached,
        None => {
            return Err(ShardingError::stale(StaleDbVersionInfo {
                db: db.to_string(),
                received: *received,
                wanted: None,
                critical_section_signal: None,
                reason: StaleReason::NoCachedInfo,
            }))
        }
    };

    let wanted = cached.version();
    if received.version() != wanted {
        // A different epoch cannot be compared against; report no wanted
        // version so the caller refreshes from scratch.
        let wanted = received.version().same_epoch(&wanted).then_some(wanted);
        return Err(ShardingError::stale(StaleDbVersionInfo {
            db: db.to_string(),
            received: *received,
            wanted,
            critical_section_signal: None,
            reason: StaleReason::VersionMismatch,
        }));
    }

    check_placement_conflict(db, received, &wanted, at_cluster_time)
}

/// Reject snapshot reads that predate the installed placement.
///
/// The transaction's snapshot time takes precedence over the received
/// conflict time. A null received conflict time disables both checks.
pub fn check_placement_conflict(
    db: &str,
    received: &ReceivedVersion,
    installed: &PlacementVersion,
    at_cluster_time: Option<Timestamp>,
) -> ShardingResult<()> {
    if received.ignores_placement_conflict() {
        return Ok(());
    }

    let required = match (at_cluster_time, received.placement_conflict_time()) {
        (Some(at), _) => at,
        (None, Some(conflict_time)) => conflict_time,
        (None, None) => return Ok(()),
    };

    if required < installed.timestamp() {
        return Err(ShardingError::MigrationConflict {
            db: db.to_string(),
            installed: installed.timestamp(),
            required,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::version::{CachedPlacementInfo, ShardId};
    use serde_json::json;

    const DB: &str = "orders";

    fn cached_at(ts: u32) -> (VersionCache, PlacementVersion) {
        let version = PlacementVersion::new_epoch(Timestamp::new(ts, 0));
        let mut cache = VersionCache::new();
        cache.set(CachedPlacementInfo::new(version, ShardId::new("shard-a")));
        (cache, version)
    }

    fn idle() -> CriticalSectionController {
        CriticalSectionController::new(DB)
    }

    fn check(
        received: &ReceivedVersion,
        cache: &VersionCache,
        cs: &CriticalSectionController,
        intent: AccessIntent,
        at: Option<Timestamp>,
    ) -> ShardingResult<()> {
        check_version_or_throw(DB, received, cache, cs, intent, at)
    }

    #[test]
    fn test_matching_version_passes() {
        let (cache, version) = cached_at(5);
        check(&version.into(), &cache, &idle(), AccessIntent::Read, None).unwrap();
    }

    #[test]
    fn test_no_cached_info_is_stale_not_conflict() {
        let received: ReceivedVersion =
            PlacementVersion::new_epoch(Timestamp::new(5, 0)).into();
        let err = check(
            &received,
            &VersionCache::new(),
            &idle(),
            AccessIntent::Read,
            Some(Timestamp::new(1, 0)),
        )
        .unwrap_err();

        let info = err.stale_info().expect("stale");
        assert_eq!(info.reason, StaleReason::NoCachedInfo);
        assert!(info.wanted.is_none());
        assert!(info.critical_section_signal.is_none());
    }

    #[test]
    fn test_version_mismatch_reports_wanted() {
        let (cache, version) = cached_at(5);
        let older = PlacementVersion::new(version.epoch(), Timestamp::new(4, 0));

        let err = check(&older.into(), &cache, &idle(), AccessIntent::Read, None).unwrap_err();
        let info = err.stale_info().unwrap();
        assert_eq!(info.reason, StaleReason::VersionMismatch);
        assert_eq!(info.wanted, Some(version));
    }

    #[test]
    fn test_epoch_mismatch_reports_no_wanted() {
        let (cache, _) = cached_at(5);
        let other_epoch = PlacementVersion::new_epoch(Timestamp::new(5, 0));

        let err =
            check(&other_epoch.into(), &cache, &idle(), AccessIntent::Read, None).unwrap_err();
        let info = err.stale_info().unwrap();
        assert_eq!(info.reason, StaleReason::VersionMismatch);
        assert!(info.wanted.is_none());
        assert!(info.requires_full_refresh());
    }

    #[test]
    fn test_critical_section_checked_first() {
        let mut cs = idle();
        cs.enter_catch_up(json!({"reason": "movePrimary"})).unwrap();
        let received: ReceivedVersion =
            PlacementVersion::new_epoch(Timestamp::new(5, 0)).into();

        // Writes are blocked during catch-up even with an empty cache.
        let err = check(&received, &VersionCache::new(), &cs, AccessIntent::Write, None)
            .unwrap_err();
        let info = err.stale_info().unwrap();
        assert!(info.should_wait());
        assert!(matches!(
            info.reason,
            StaleReason::CriticalSectionActive { .. }
        ));
        assert!(err.to_string().contains("movePrimary"));

        // Reads fall through to the cache check during catch-up.
        let err =
            check(&received, &VersionCache::new(), &cs, AccessIntent::Read, None).unwrap_err();
        assert_eq!(err.stale_info().unwrap().reason, StaleReason::NoCachedInfo);
    }

    #[test]
    fn test_commit_phase_blocks_reads() {
        let (cache, version) = cached_at(5);
        let mut cs = idle();
        cs.enter_catch_up(json!("r")).unwrap();
        check(&version.into(), &cache, &cs, AccessIntent::Read, None).unwrap();

        cs.enter_commit(&json!("r")).unwrap();
        let err = check(&version.into(), &cache, &cs, AccessIntent::Read, None).unwrap_err();
        assert!(err.stale_info().unwrap().should_wait());
    }

    #[test]
    fn test_snapshot_before_installed_conflicts() {
        let (cache, version) = cached_at(5);

        let err = check(
            &version.into(),
            &cache,
            &idle(),
            AccessIntent::Read,
            Some(Timestamp::new(4, 0)),
        )
        .unwrap_err();
        assert!(matches!(err, ShardingError::MigrationConflict { .. }));

        check(
            &version.into(),
            &cache,
            &idle(),
            AccessIntent::Read,
            Some(Timestamp::new(6, 0)),
        )
        .unwrap();
        check(
            &version.into(),
            &cache,
            &idle(),
            AccessIntent::Read,
            Some(Timestamp::new(5, 0)),
        )
        .unwrap();
    }

    #[test]
    fn test_received_conflict_time() {
        let (cache, version) = cached_at(5);

        let stale = ReceivedVersion::new(version).with_placement_conflict_time(Timestamp::new(3, 0));
        let err = check(&stale, &cache, &idle(), AccessIntent::Write, None).unwrap_err();
        assert!(matches!(err, ShardingError::MigrationConflict { .. }));

        let fresh = ReceivedVersion::new(version).with_placement_conflict_time(Timestamp::new(7, 0));
        check(&fresh, &cache, &idle(), AccessIntent::Write, None).unwrap();
    }

    #[test]
    fn test_cluster_time_overrides_conflict_time() {
        let (cache, version) = cached_at(5);
        let received =
            ReceivedVersion::new(version).with_placement_conflict_time(Timestamp::new(9, 0));

        let err = check(
            &received,
            &cache,
            &idle(),
            AccessIntent::Read,
            Some(Timestamp::new(4, 0)),
        )
        .unwrap_err();
        assert!(matches!(err, ShardingError::MigrationConflict { .. }));
    }

    #[test]
    fn test_null_conflict_time_ignores_cluster_time() {
        let (cache, version) = cached_at(5);
        let received = ReceivedVersion::new(version).with_placement_conflict_time(Timestamp::ZERO);

        check(
            &received,
            &cache,
            &idle(),
            AccessIntent::Read,
            Some(Timestamp::new(1, 0)),
        )
        .unwrap();
    }

    #[test]
    fn test_check_is_deterministic() {
        let (cache, version) = cached_at(5);
        let cs = idle();
        let at = Some(Timestamp::new(4, 0));

        let outcomes: Vec<_> = (0..5)
            .map(|_| {
                check(&version.into(), &cache, &cs, AccessIntent::Read, at)
                    .map_err(|e| e.code())
            })
            .collect();
        assert!(outcomes.iter().all(|o| *o == outcomes[0]));
        assert_eq!(outcomes[0], Err("MIGRATION_CONFLICT"));
    }
}
