use std::time::Duration;

use sha2::{Digest as _, Sha256};

use scour_storage::CSUM_META;
use scour_types::Digest;

use crate::gc::GcOptions;
use crate::index::HEADER_LEN;
use crate::testutil::MemoryStore;

/// Digest with every byte set to `b`.
pub fn digest(b: u8) -> Digest {
    Digest([b; 32])
}

/// Assemble an index body: 4096-byte header with the payload checksum
/// embedded at [32, 64), followed by the payload. Returns the body and the
/// lowercase hex csum for the object metadata.
pub fn index_body(payload: &[u8]) -> (Vec<u8>, String) {
    let csum = Sha256::digest(payload);
    let mut body = vec![0u8; HEADER_LEN];
    body[32..64].copy_from_slice(&csum);
    body.extend_from_slice(payload);
    (body, hex::encode(csum))
}

/// Payload of a fixed index: the concatenated digests.
pub fn fixed_payload(digests: &[Digest]) -> Vec<u8> {
    let mut out = Vec::with_capacity(digests.len() * 32);
    for d in digests {
        out.extend_from_slice(&d.0);
    }
    out
}

/// Payload of a dynamic index: (u64-LE offset, digest) records.
pub fn dynamic_payload(records: &[(u64, Digest)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(records.len() * 40);
    for (offset, d) in records {
        out.extend_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(&d.0);
    }
    out
}

/// Store a fixed index for `digests` at `key`, with csum metadata.
/// Returns the csum.
pub fn put_fixed_index(store: &MemoryStore, key: &str, digests: &[Digest]) -> String {
    let (body, csum) = index_body(&fixed_payload(digests));
    store.insert_with_meta(key, &body, &[(CSUM_META, csum.as_str())]);
    csum
}

/// Store a dynamic index for `records` at `key`, with csum metadata.
/// Returns the csum.
pub fn put_dynamic_index(store: &MemoryStore, key: &str, records: &[(u64, Digest)]) -> String {
    let (body, csum) = index_body(&dynamic_payload(records));
    store.insert_with_meta(key, &body, &[(CSUM_META, csum.as_str())]);
    csum
}

/// Store the chunk blob for a digest.
pub fn put_chunk(store: &MemoryStore, d: &Digest) {
    store.insert(&d.chunk_key(), b"chunk data");
}

/// A snapshot base path with the given id and age in days.
pub fn snapshot_base(id: &str, age_days: i64) -> String {
    let t = chrono::Utc::now().timestamp() - age_days * 86_400;
    format!("backups/host1/{id}/{t}")
}

/// Options for driver tests: short lock timeout, defaults otherwise.
pub fn test_options() -> GcOptions {
    GcOptions {
        endpoint: "s3.test:9000".into(),
        bucket: "backups-test".into(),
        retention_days: 60,
        lock_timeout: Duration::from_millis(200),
    }
}
