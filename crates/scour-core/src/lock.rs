//! Cross-host mutual exclusion for destructive runs.
//!
//! The lock lives in the bucket it protects, the one medium every host that
//! can mutate the bucket shares. Acquisition writes a uniquely-keyed JSON
//! entry under the lock's prefix; the lexically smallest key holds the lock
//! and later writers back off and retry until the acquisition timeout.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tracing::debug;

use scour_storage::ObjectStore;
use scour_types::{Result, ScourError};

/// Fixed tag prefixing every lock name.
const LOCK_TAG: &str = "PBSS3";

/// Prefix under which lock entries are written.
const LOCKS_PREFIX: &str = "locks/";

/// Give up acquiring after this long.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between acquisition attempts while another holder is active.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Entries older than this are stale leftovers of a dead process.
const STALE_LOCK_SECS: i64 = 6 * 60 * 60;

/// Deterministic lock name for an (endpoint, bucket) pair.
pub fn lock_name(endpoint: &str, bucket: &str) -> String {
    let hash = Sha256::digest(format!("{endpoint}|{bucket}").as_bytes());
    format!("{LOCK_TAG}{}", &hex::encode(hash)[..16])
}

#[derive(Debug, Serialize, Deserialize)]
struct LockEntry {
    hostname: String,
    pid: u32,
    time: String,
}

/// Handle to an acquired lock.
#[derive(Debug)]
pub struct LockGuard {
    key: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Acquire the named lock, waiting up to `timeout` for a current holder to
/// release it.
pub fn acquire(store: &dyn ObjectStore, name: &str, timeout: Duration) -> Result<LockGuard> {
    let deadline = Instant::now() + timeout;
    loop {
        match try_acquire(store, name) {
            Err(ScourError::Locked(holder)) => {
                if Instant::now() >= deadline {
                    return Err(ScourError::LockTimeout(name.to_string()));
                }
                debug!("lock {name} held by {holder}, retrying");
                std::thread::sleep(RETRY_DELAY);
            }
            other => return other,
        }
    }
}

/// Release an acquired lock.
pub fn release(store: &dyn ObjectStore, guard: LockGuard) -> Result<()> {
    store.remove(&guard.key)
}

/// Single acquisition attempt: write a uniquely-keyed entry, then let the
/// lexically smallest key win.
fn try_acquire(store: &dyn ObjectStore, name: &str) -> Result<LockGuard> {
    cleanup_stale_locks(store, name)?;

    let entry = LockEntry {
        hostname: hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".into()),
        pid: std::process::id(),
        time: Utc::now().to_rfc3339(),
    };
    // Timestamp prefix keeps older lock keys sorted first.
    let ts = Utc::now().timestamp_micros();
    let uuid = format!("{:032x}", rand::random::<u128>());
    let key = format!("{}{ts:020}-{uuid}.json", lock_prefix(name));
    let data = serde_json::to_vec(&entry)
        .map_err(|e| ScourError::Storage(format!("lock serialize: {e}")))?;

    store.put(&key, &data)?;

    let mut keys = list_lock_keys(store, name)?;
    keys.sort();
    if keys.first() != Some(&key) {
        // Lost the race: withdraw our entry and report the current holder.
        let _ = store.remove(&key);
        let holder = keys
            .first()
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        return Err(ScourError::Locked(holder));
    }

    Ok(LockGuard { key })
}

fn lock_prefix(name: &str) -> String {
    format!("{LOCKS_PREFIX}{name}/")
}

fn list_lock_keys(store: &dyn ObjectStore, name: &str) -> Result<Vec<String>> {
    let prefix = lock_prefix(name);
    let mut keys = Vec::new();
    for item in store.list(&prefix, false) {
        let obj = item?;
        if obj.key.ends_with(".json") {
            keys.push(obj.key);
        }
    }
    Ok(keys)
}

fn cleanup_stale_locks(store: &dyn ObjectStore, name: &str) -> Result<()> {
    let now = Utc::now();
    for key in list_lock_keys(store, name)? {
        let Ok(data) = store.get(&key) else {
            continue;
        };
        let Ok(entry) = serde_json::from_slice::<LockEntry>(&data) else {
            continue;
        };
        let Ok(acquired) = chrono::DateTime::parse_from_rfc3339(&entry.time) else {
            continue;
        };
        let age = now.signed_duration_since(acquired.with_timezone(&Utc));
        if age.num_seconds() > STALE_LOCK_SECS {
            debug!("removing stale lock entry {key} held by {}", entry.hostname);
            let _ = store.remove(&key);
        }
    }
    Ok(())
}
