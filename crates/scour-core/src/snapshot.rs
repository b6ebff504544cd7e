//! Snapshot discovery and deletion.
//!
//! A snapshot is a distinct base path under `backups/` owning at least one
//! index object, where the base path of a key is the key up to but not
//! including its final `/`-segment. The final segment of the base path is
//! the backup time in unix seconds; the segment before it is the backup id.

use std::collections::BTreeSet;
use std::fmt;

use tracing::warn;

use scour_storage::ObjectStore;
use scour_types::Result;

use crate::index::IndexKind;

/// Prefix all snapshot data lives under.
pub const BACKUPS_PREFIX: &str = "backups/";

/// Marker object name flagging a snapshot as protected.
const PROTECTED_MARKER: &str = "protected";

#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Key prefix of the snapshot directory, no trailing slash.
    pub base_path: String,
    /// Identifier segment preceding the timestamp in the base path.
    pub backup_id: String,
    /// Creation time in unix seconds, parsed from the final path segment.
    pub backup_time: i64,
    /// Protected snapshots are exempt from retention.
    pub protected: bool,
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_path)
    }
}

/// Base path of an object key: the key up to but not including the final
/// path segment. `None` for top-level keys.
pub fn base_path(key: &str) -> Option<&str> {
    key.rsplit_once('/').map(|(base, _)| base)
}

/// Enumerate all snapshots in the bucket.
///
/// One recursive pass over `backups/`: every base path holding at least one
/// index object is a snapshot, and a `protected` marker next to the indexes
/// flags it. A base path whose time segment does not parse is skipped with
/// a warning: retention must not guess at ages, and the mark phase walks
/// indexes independently of this listing.
pub fn list_snapshots(store: &dyn ObjectStore) -> Result<Vec<Snapshot>> {
    let mut index_dirs: BTreeSet<String> = BTreeSet::new();
    let mut protected_dirs: BTreeSet<String> = BTreeSet::new();

    for item in store.list(BACKUPS_PREFIX, false) {
        let obj = item?;
        let Some((base, name)) = obj.key.rsplit_once('/') else {
            continue;
        };
        if IndexKind::from_key(name).is_some() {
            index_dirs.insert(base.to_string());
        } else if name == PROTECTED_MARKER {
            protected_dirs.insert(base.to_string());
        }
    }

    let mut snapshots = Vec::with_capacity(index_dirs.len());
    for base in index_dirs {
        let mut segments = base.rsplit('/');
        let time_segment = segments.next().unwrap_or("");
        let backup_time = match time_segment.parse::<i64>() {
            Ok(t) => t,
            Err(_) => {
                warn!(
                    "snapshot {base}: cannot parse '{time_segment}' as a unix timestamp, \
                     excluding from retention"
                );
                continue;
            }
        };
        let backup_id = segments.next().unwrap_or("").to_string();
        snapshots.push(Snapshot {
            protected: protected_dirs.contains(&base),
            base_path: base,
            backup_id,
            backup_time,
        });
    }
    Ok(snapshots)
}

impl Snapshot {
    /// Delete every object under this snapshot's base path.
    ///
    /// Per-object failures are logged and counted, not raised: retention
    /// must keep walking the remaining snapshots. Returns the number of
    /// failed removals.
    pub fn delete(&self, store: &dyn ObjectStore) -> usize {
        let prefix = format!("{}/", self.base_path);
        let producer = store.list(&prefix, false).filter_map(|item| match item {
            Ok(obj) => Some(obj),
            Err(e) => {
                warn!("listing {} during snapshot delete: {e}", self.base_path);
                None
            }
        });

        let mut errors = 0;
        for err in store.remove_many(Box::new(producer)) {
            warn!("failed to remove {}: {}", err.key, err.reason);
            errors += 1;
        }
        errors
    }
}
