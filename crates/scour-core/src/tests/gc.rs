use scour_storage::CSUM_META;
use scour_types::{Digest, ScourError};

use super::helpers::{
    digest, put_chunk, put_dynamic_index, put_fixed_index, snapshot_base, test_options,
};
use crate::gc::run;
use crate::testutil::MemoryStore;

#[test]
fn empty_bucket_is_fatal_and_releases_the_lock() {
    let store = MemoryStore::new();
    store.insert(&digest(0xBB).chunk_key(), b"stray");

    let err = run(&store, &test_options()).unwrap_err();
    assert!(matches!(err, ScourError::NoSnapshots(_)));

    // Nothing destructive happened and the lock is gone.
    assert!(store.contains(&digest(0xBB).chunk_key()));
    assert!(store.keys_under("locks/").is_empty());
}

#[test]
fn missing_bucket_is_fatal() {
    let store = MemoryStore::new();
    store.set_bucket_missing();

    let err = run(&store, &test_options()).unwrap_err();
    assert!(matches!(err, ScourError::BucketNotFound(_)));
    assert!(store.keys_under("locks/").is_empty());
}

#[test]
fn fresh_snapshot_leaves_the_bucket_unchanged() {
    let store = MemoryStore::new();
    let base = snapshot_base("vm-100", 1);
    put_fixed_index(&store, &format!("{base}/sda.fidx"), &[digest(0xAA)]);
    put_chunk(&store, &digest(0xAA));

    let stats = run(&store, &test_options()).unwrap();

    assert_eq!(stats.snapshots_deleted, 0);
    assert_eq!(stats.chunks_removed, 0);
    assert_eq!(stats.chunks_kept, 1);
    assert_eq!(stats.chunks_missing, 0);
    assert!(store.contains(&format!("{base}/sda.fidx")));
    assert!(store.contains(&digest(0xAA).chunk_key()));
    assert!(store.keys_under("locks/").is_empty());
}

#[test]
fn unreferenced_chunk_is_swept_and_referenced_chunk_survives() {
    let store = MemoryStore::new();
    let base = snapshot_base("vm-100", 1);
    put_fixed_index(&store, &format!("{base}/sda.fidx"), &[digest(0xAA)]);
    put_chunk(&store, &digest(0xAA));
    put_chunk(&store, &digest(0xBB));

    let stats = run(&store, &test_options()).unwrap();

    assert!(store.contains(&digest(0xAA).chunk_key()));
    assert!(!store.contains(&digest(0xBB).chunk_key()));
    assert_eq!(stats.chunks_removed, 1);
    assert_eq!(stats.chunks_kept, 1);
}

#[test]
fn missing_referenced_chunk_marks_the_snapshot_corrupted() {
    let store = MemoryStore::new();
    let base = snapshot_base("vm-100", 1);
    put_fixed_index(&store, &format!("{base}/sda.fidx"), &[digest(0xCC)]);

    let stats = run(&store, &test_options()).unwrap();

    assert_eq!(stats.chunks_missing, 1);
    assert_eq!(stats.snapshots_marked_corrupt, 1);
    assert_eq!(store.body(&format!("{base}/corrupted")).unwrap(), b"CORRUPTED");
}

#[test]
fn corruption_marker_write_failure_is_fatal() {
    let store = MemoryStore::new();
    let base = snapshot_base("vm-100", 1);
    put_fixed_index(&store, &format!("{base}/sda.fidx"), &[digest(0xCC)]);
    store.fail_put_of(&format!("{base}/corrupted"));

    let err = run(&store, &test_options()).unwrap_err();
    assert!(matches!(err, ScourError::Transport(_)));
    assert!(store.keys_under("locks/").is_empty());
}

#[test]
fn unaligned_index_aborts_before_any_chunk_deletion() {
    let store = MemoryStore::new();
    let base = snapshot_base("vm-100", 1);
    let (body, csum) = super::helpers::index_body(&[0u8; 17]);
    store.insert_with_meta(&format!("{base}/sda.fidx"), &body, &[(CSUM_META, csum.as_str())]);
    put_chunk(&store, &digest(0xBB));

    let err = run(&store, &test_options()).unwrap_err();
    assert!(matches!(err, ScourError::UnalignedFixedIndex { .. }));

    // The orphan chunk is untouched: the sweep never ran.
    assert!(store.contains(&digest(0xBB).chunk_key()));
    assert!(store.keys_under("locks/").is_empty());
}

#[test]
fn csum_mismatch_aborts_before_any_chunk_deletion() {
    let store = MemoryStore::new();
    let base = snapshot_base("vm-100", 1);
    let (body, _) = super::helpers::index_body(&super::helpers::fixed_payload(&[digest(0xAA)]));
    let wrong = "0".repeat(64);
    store.insert_with_meta(&format!("{base}/sda.fidx"), &body, &[(CSUM_META, wrong.as_str())]);
    put_chunk(&store, &digest(0xBB));

    let err = run(&store, &test_options()).unwrap_err();
    assert!(matches!(err, ScourError::CorruptIndex { .. }));
    assert!(store.contains(&digest(0xBB).chunk_key()));
}

#[test]
fn fidx_without_csum_metadata_is_fatal() {
    let store = MemoryStore::new();
    let base = snapshot_base("vm-100", 1);
    let (body, _) = super::helpers::index_body(&super::helpers::fixed_payload(&[digest(0xAA)]));
    store.insert(&format!("{base}/sda.fidx"), &body);

    let err = run(&store, &test_options()).unwrap_err();
    assert!(matches!(err, ScourError::MissingCsum(_)));
}

#[test]
fn protected_snapshot_and_its_chunks_outlive_retention() {
    let store = MemoryStore::new();
    let base = snapshot_base("vm-100", 900);
    put_fixed_index(&store, &format!("{base}/sda.fidx"), &[digest(0xDD)]);
    store.insert(&format!("{base}/protected"), b"");
    put_chunk(&store, &digest(0xDD));

    let stats = run(&store, &test_options()).unwrap();

    assert_eq!(stats.snapshots_deleted, 0);
    assert_eq!(stats.snapshots_protected, 1);
    assert!(store.contains(&format!("{base}/sda.fidx")));
    assert!(store.contains(&digest(0xDD).chunk_key()));
}

#[test]
fn expired_snapshot_chunks_become_orphans_and_are_swept() {
    let store = MemoryStore::new();
    let old = snapshot_base("vm-old", 120);
    let fresh = snapshot_base("vm-new", 1);
    put_fixed_index(&store, &format!("{old}/sda.fidx"), &[digest(0x01)]);
    put_fixed_index(&store, &format!("{fresh}/sda.fidx"), &[digest(0x02)]);
    put_chunk(&store, &digest(0x01));
    put_chunk(&store, &digest(0x02));

    let stats = run(&store, &test_options()).unwrap();

    assert_eq!(stats.snapshots_deleted, 1);
    assert!(store.keys_under(&old).is_empty());
    assert!(!store.contains(&digest(0x01).chunk_key()));
    assert!(store.contains(&digest(0x02).chunk_key()));
    assert_eq!(stats.chunks_removed, 1);
}

#[test]
fn dynamic_index_marks_both_records_live() {
    let store = MemoryStore::new();
    let base = snapshot_base("vm-100", 1);
    put_dynamic_index(
        &store,
        &format!("{base}/root.didx"),
        &[(0, digest(0x11)), (4 * 1024 * 1024, digest(0x22))],
    );
    put_chunk(&store, &digest(0x11));
    put_chunk(&store, &digest(0x22));
    put_chunk(&store, &digest(0x33));

    let stats = run(&store, &test_options()).unwrap();

    assert!(store.contains(&digest(0x11).chunk_key()));
    assert!(store.contains(&digest(0x22).chunk_key()));
    assert!(!store.contains(&digest(0x33).chunk_key()));
    assert_eq!(stats.chunks_referenced, 2);
    assert_eq!(stats.chunks_removed, 1);
}

#[test]
fn no_live_chunk_is_ever_deleted() {
    // Several indexes sharing digests; the sweep must touch none of them.
    let store = MemoryStore::new();
    let a = snapshot_base("vm-a", 1);
    let b = snapshot_base("vm-b", 2);
    let live: Vec<Digest> = (1..=8).map(digest).collect();
    put_fixed_index(&store, &format!("{a}/sda.fidx"), &live[..5]);
    put_dynamic_index(
        &store,
        &format!("{b}/root.didx"),
        &live[3..].iter().map(|d| (0u64, *d)).collect::<Vec<_>>(),
    );
    for d in &live {
        put_chunk(&store, d);
    }
    for d in [digest(0xE0), digest(0xE1)] {
        put_chunk(&store, &d);
    }

    let stats = run(&store, &test_options()).unwrap();

    for d in &live {
        assert!(store.contains(&d.chunk_key()), "live chunk {d} was deleted");
    }
    assert_eq!(stats.chunks_kept, 8);
    assert_eq!(stats.chunks_removed, 2);
    assert_eq!(stats.chunks_missing, 0);
}

#[test]
fn every_orphan_is_swept() {
    let store = MemoryStore::new();
    let base = snapshot_base("vm-100", 1);
    put_fixed_index(&store, &format!("{base}/sda.fidx"), &[digest(0xAA)]);
    put_chunk(&store, &digest(0xAA));
    for b in 0x10..0x20 {
        put_chunk(&store, &digest(b));
    }
    // A key under chunks/ that decodes to no digest is unreachable by
    // definition and is swept with the orphans.
    store.insert("chunks/garbage", b"junk");

    let stats = run(&store, &test_options()).unwrap();

    assert_eq!(stats.chunks_removed, 17);
    assert_eq!(store.keys_under("chunks/"), vec![digest(0xAA).chunk_key()]);
}

#[test]
fn chunk_removal_errors_are_logged_not_fatal() {
    let store = MemoryStore::new();
    let base = snapshot_base("vm-100", 1);
    put_fixed_index(&store, &format!("{base}/sda.fidx"), &[digest(0xAA)]);
    put_chunk(&store, &digest(0xAA));
    put_chunk(&store, &digest(0xBB));
    put_chunk(&store, &digest(0xCC));
    store.fail_removal_of(&digest(0xBB).chunk_key());

    let stats = run(&store, &test_options()).unwrap();

    assert_eq!(stats.removal_errors, 1);
    assert_eq!(stats.chunks_removed, 1);
    assert!(store.contains(&digest(0xBB).chunk_key()));
    assert!(!store.contains(&digest(0xCC).chunk_key()));
}

#[test]
fn orphaned_indexed_objects_are_swept() {
    let store = MemoryStore::new();
    let base = snapshot_base("vm-100", 1);
    let csum = put_fixed_index(&store, &format!("{base}/sda.fidx"), &[digest(0xAA)]);
    put_chunk(&store, &digest(0xAA));
    store.insert_with_meta("indexed/live", b"", &[(CSUM_META, csum.as_str())]);
    let foreign = "f".repeat(64);
    store.insert_with_meta("indexed/orphan", b"", &[(CSUM_META, foreign.as_str())]);
    store.insert("indexed/no-metadata", b"");

    let stats = run(&store, &test_options()).unwrap();

    assert!(store.contains("indexed/live"));
    assert!(!store.contains("indexed/orphan"));
    assert!(!store.contains("indexed/no-metadata"));
    assert_eq!(stats.indexed_removed, 2);
}

#[test]
fn dynamic_index_csums_do_not_shadow_indexed_objects() {
    // Only .fidx objects feed the indexed/ shadow set; an indexed object
    // matching a dynamic index csum is still an orphan.
    let store = MemoryStore::new();
    let base = snapshot_base("vm-100", 1);
    let didx_csum = put_dynamic_index(&store, &format!("{base}/root.didx"), &[(0, digest(0xAA))]);
    put_chunk(&store, &digest(0xAA));
    store.insert_with_meta("indexed/shadow", b"", &[(CSUM_META, didx_csum.as_str())]);

    let stats = run(&store, &test_options()).unwrap();

    assert!(!store.contains("indexed/shadow"));
    assert_eq!(stats.indexed_removed, 1);
}

#[test]
fn shared_chunk_survives_while_sole_referrer_expires() {
    // A chunk referenced by both an expired and a fresh snapshot stays; a
    // chunk only the expired snapshot used goes.
    let store = MemoryStore::new();
    let old = snapshot_base("vm-old", 120);
    let fresh = snapshot_base("vm-new", 1);
    put_fixed_index(&store, &format!("{old}/sda.fidx"), &[digest(0x01), digest(0x02)]);
    put_fixed_index(&store, &format!("{fresh}/sda.fidx"), &[digest(0x02)]);
    put_chunk(&store, &digest(0x01));
    put_chunk(&store, &digest(0x02));

    run(&store, &test_options()).unwrap();

    assert!(!store.contains(&digest(0x01).chunk_key()));
    assert!(store.contains(&digest(0x02).chunk_key()));
}

#[test]
fn corruption_markers_cover_every_referring_snapshot() {
    let store = MemoryStore::new();
    let a = snapshot_base("vm-a", 1);
    let b = snapshot_base("vm-b", 2);
    put_fixed_index(&store, &format!("{a}/sda.fidx"), &[digest(0xCC)]);
    put_dynamic_index(&store, &format!("{b}/root.didx"), &[(0, digest(0xCC))]);

    let stats = run(&store, &test_options()).unwrap();

    assert_eq!(stats.snapshots_marked_corrupt, 2);
    assert_eq!(store.body(&format!("{a}/corrupted")).unwrap(), b"CORRUPTED");
    assert_eq!(store.body(&format!("{b}/corrupted")).unwrap(), b"CORRUPTED");
}
