//! Snapshot retention: delete snapshots past their age limit.

use tracing::info;

use scour_storage::ObjectStore;

use crate::snapshot::Snapshot;

const SECONDS_PER_DAY: i64 = 86_400;

/// Outcome counts of a retention pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetentionStats {
    pub deleted: usize,
    pub kept: usize,
    pub protected: usize,
    pub removal_errors: usize,
}

/// Delete unprotected snapshots older than `retention_days`.
///
/// `now` is captured once by the caller so a slow pass cannot flip the
/// expiry decision between snapshots.
pub fn apply(
    store: &dyn ObjectStore,
    snapshots: &[Snapshot],
    retention_days: u32,
    now: i64,
) -> RetentionStats {
    let mut stats = RetentionStats::default();
    let max_age = i64::from(retention_days) * SECONDS_PER_DAY;

    for snapshot in snapshots {
        if snapshot.backup_time + max_age < now {
            if snapshot.protected {
                info!(
                    "snapshot {snapshot} is older than {retention_days} days but marked as \
                     protected, skipping removal"
                );
                stats.protected += 1;
                continue;
            }
            info!("snapshot {snapshot} is older than {retention_days} days, deleting");
            stats.removal_errors += snapshot.delete(store);
            stats.deleted += 1;
        } else {
            info!("snapshot {snapshot} is newer than {retention_days} days, keeping");
            stats.kept += 1;
        }
    }
    stats
}
