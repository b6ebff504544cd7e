//! The garbage collection run: five phases in strict order under one lock.
//!
//! 1. Delete snapshots past retention.
//! 2. Delete `indexed/` objects whose csum no surviving fixed index carries.
//! 3. Parse every surviving index into the live chunk set.
//! 4. Delete `chunks/` objects the mark did not reach.
//! 5. Mark snapshots referencing missing chunks as corrupted.
//!
//! The order is load-bearing: the live set must be closed before any chunk
//! is deleted, and survivors must be recorded before the audit.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use scour_storage::{ObjectStore, CSUM_META};
use scour_types::{Digest, Result, ScourError};

use crate::index::{self, IndexKind};
use crate::lock;
use crate::retention;
use crate::snapshot::{self, BACKUPS_PREFIX};

/// Prefix of the index-checksum shadow objects.
const INDEXED_PREFIX: &str = "indexed/";

/// Prefix of the chunk blobs.
const CHUNKS_PREFIX: &str = "chunks/";

/// Marker object name and body written next to corrupted snapshots.
const CORRUPTED_MARKER: &str = "corrupted";
const CORRUPTED_BODY: &[u8] = b"CORRUPTED";

#[derive(Debug, Clone)]
pub struct GcOptions {
    /// S3 endpoint, combined with the bucket to derive the lock name.
    pub endpoint: String,
    pub bucket: String,
    pub retention_days: u32,
    pub lock_timeout: Duration,
}

/// Summary of a collection run.
#[derive(Debug, Default)]
pub struct GcStats {
    pub snapshots_total: usize,
    pub snapshots_deleted: usize,
    pub snapshots_protected: usize,
    pub indexed_removed: usize,
    pub indexes_parsed: usize,
    pub chunks_referenced: usize,
    pub chunks_removed: usize,
    pub chunks_kept: usize,
    pub chunks_missing: usize,
    pub snapshots_marked_corrupt: usize,
    pub removal_errors: usize,
}

/// Run a full collection against the bucket behind `store`.
pub fn run(store: &dyn ObjectStore, opts: &GcOptions) -> Result<GcStats> {
    let name = lock::lock_name(&opts.endpoint, &opts.bucket);
    info!("acquiring lock {name}");
    let guard = lock::acquire(store, &name, opts.lock_timeout)?;
    debug!("locked {name}");

    let result = run_locked(store, opts);

    match lock::release(store, guard) {
        Ok(()) => result,
        Err(release_err) => {
            if result.is_err() {
                warn!("failed to release lock {name}: {release_err}");
                result
            } else {
                Err(release_err)
            }
        }
    }
}

fn run_locked(store: &dyn ObjectStore, opts: &GcOptions) -> Result<GcStats> {
    if !store.bucket_exists()? {
        return Err(ScourError::BucketNotFound(opts.bucket.clone()));
    }

    let mut stats = GcStats::default();

    // Phase 1: delete snapshots past retention.
    info!("fetching snapshots");
    let snapshots = snapshot::list_snapshots(store)?;
    if snapshots.is_empty() {
        return Err(ScourError::NoSnapshots(opts.bucket.clone()));
    }
    info!("{} snapshots in bucket", snapshots.len());
    stats.snapshots_total = snapshots.len();
    let now = Utc::now().timestamp();
    let outcome = retention::apply(store, &snapshots, opts.retention_days, now);
    stats.snapshots_deleted = outcome.deleted;
    stats.snapshots_protected = outcome.protected;
    stats.removal_errors += outcome.removal_errors;

    // Phase 2: remove orphaned indexed objects.
    info!("fetching index checksums");
    let live_csums = collect_index_csums(store)?;
    info!("{} index checksums found", live_csums.len());
    info!("removing orphaned indexed objects");
    sweep_indexed(store, &live_csums, &mut stats)?;

    // Phase 3: mark every chunk referenced by a surviving index.
    let live_chunks = mark_chunks(store, &mut stats)?;
    info!("enumerated {} referenced chunks", live_chunks.len());
    stats.chunks_referenced = live_chunks.len();

    // Phase 4: sweep chunks the mark did not reach.
    info!("removing orphaned chunks");
    let survivors = sweep_chunks(store, &live_chunks, &mut stats)?;

    // Phase 5: every referenced chunk must have survived.
    info!("running integrity check");
    audit_chunks(store, &live_chunks, &survivors, &mut stats)?;

    info!("finished");
    Ok(stats)
}

/// First pass of phase 2: gather the csum of every fixed index under
/// `backups/`. Only `.fidx` objects participate in the `indexed/` shadow
/// set; dynamic indexes contribute to liveness in phase 3 alone.
fn collect_index_csums(store: &dyn ObjectStore) -> Result<HashSet<String>> {
    let mut csums = HashSet::new();
    for item in store.list(BACKUPS_PREFIX, true) {
        let obj = item?;
        if IndexKind::from_key(&obj.key) != Some(IndexKind::Fixed) {
            continue;
        }
        let csum = obj.user_meta(CSUM_META).unwrap_or("");
        if csum.is_empty() {
            return Err(ScourError::MissingCsum(obj.key.clone()));
        }
        csums.insert(csum.to_string());
    }
    Ok(csums)
}

/// Second pass of phase 2: stream `indexed/` objects whose csum matches no
/// surviving fixed index into the deleter.
fn sweep_indexed(
    store: &dyn ObjectStore,
    live_csums: &HashSet<String>,
    stats: &mut GcStats,
) -> Result<()> {
    let mut list_err = None;
    let mut produced = 0usize;
    let producer = store
        .list(INDEXED_PREFIX, true)
        .map_while(|item| match item {
            Ok(obj) => Some(obj),
            Err(e) => {
                list_err = Some(e);
                None
            }
        })
        .filter(|obj| match obj.user_meta(CSUM_META) {
            Some(csum) if live_csums.contains(csum) => false,
            csum => {
                info!(
                    "removing orphaned indexed object {} (csum {})",
                    obj.key,
                    csum.unwrap_or("<missing>")
                );
                produced += 1;
                true
            }
        });

    let mut failed = 0usize;
    for err in store.remove_many(Box::new(producer)) {
        warn!("failed to remove {}: {}", err.key, err.reason);
        failed += 1;
    }
    if let Some(e) = list_err {
        return Err(e);
    }

    stats.indexed_removed = produced - failed;
    stats.removal_errors += failed;
    Ok(())
}

/// Phase 3: parse every surviving index into digest -> referrer keys.
///
/// An index may reference the same chunk many times; referrers are appended
/// as-is so the audit can name every index pointing at a missing chunk.
fn mark_chunks(
    store: &dyn ObjectStore,
    stats: &mut GcStats,
) -> Result<HashMap<Digest, Vec<String>>> {
    let mut live: HashMap<Digest, Vec<String>> = HashMap::new();
    for item in store.list(BACKUPS_PREFIX, true) {
        let obj = item?;
        let Some(kind) = IndexKind::from_key(&obj.key) else {
            continue;
        };
        match kind {
            IndexKind::Fixed => info!("processing fixed index: {}", obj.key),
            IndexKind::Dynamic => info!("processing dynamic index: {}", obj.key),
        }
        let body = store.get(&obj.key)?;
        let declared = obj.user_meta(CSUM_META).unwrap_or("");
        for digest in index::digests(kind, &obj.key, &body, declared)? {
            live.entry(digest).or_default().push(obj.key.clone());
        }
        stats.indexes_parsed += 1;
    }
    Ok(live)
}

/// Phase 4: delete chunks the mark did not reach, recording survivors.
fn sweep_chunks(
    store: &dyn ObjectStore,
    live: &HashMap<Digest, Vec<String>>,
    stats: &mut GcStats,
) -> Result<HashSet<Digest>> {
    let mut survivors = HashSet::new();
    let mut list_err = None;
    let mut produced = 0usize;
    let producer = store
        .list(CHUNKS_PREFIX, false)
        .map_while(|item| match item {
            Ok(obj) => Some(obj),
            Err(e) => {
                list_err = Some(e);
                None
            }
        })
        .filter(|obj| match Digest::from_chunk_key(&obj.key) {
            Ok(digest) if live.contains_key(&digest) => {
                debug!("chunk still referenced: {digest}, skipping removal");
                survivors.insert(digest);
                false
            }
            // Unreferenced or undecodable: either way nothing points at it.
            _ => {
                produced += 1;
                true
            }
        });

    let mut failed = 0usize;
    for err in store.remove_many(Box::new(producer)) {
        warn!("failed to remove {}: {}", err.key, err.reason);
        failed += 1;
    }
    if let Some(e) = list_err {
        return Err(e);
    }

    stats.chunks_removed = produced - failed;
    stats.chunks_kept = survivors.len();
    stats.removal_errors += failed;
    Ok(survivors)
}

/// Phase 5: every marked digest must exist under `chunks/`. Referrers of a
/// missing digest get a corruption marker so the next backup skips
/// incremental dedup against them and recreates the missing chunks.
fn audit_chunks(
    store: &dyn ObjectStore,
    live: &HashMap<Digest, Vec<String>>,
    survivors: &HashSet<Digest>,
    stats: &mut GcStats,
) -> Result<()> {
    let mut marked: HashSet<String> = HashSet::new();
    for (digest, referrers) in live {
        if survivors.contains(digest) {
            continue;
        }
        error!(
            "corruption detected: chunk {} referenced by {} is missing",
            digest.to_hex(),
            referrers.join(",")
        );
        stats.chunks_missing += 1;
        for referrer in referrers {
            let Some(base) = snapshot::base_path(referrer) else {
                continue;
            };
            let marker = format!("{base}/{CORRUPTED_MARKER}");
            // The operator must learn that corruption was recorded; a
            // failed marker write aborts the run.
            store.put(&marker, CORRUPTED_BODY)?;
            if marked.insert(marker) {
                stats.snapshots_marked_corrupt += 1;
            }
        }
    }
    Ok(())
}
