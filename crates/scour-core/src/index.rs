//! Readers for the two index object formats.
//!
//! Both formats open with a fixed 4096-byte header that embeds the SHA-256
//! of the payload at bytes `[32, 64)`. The same checksum travels as object
//! metadata; header, metadata and a fresh computation must agree before any
//! digest leaves the parser.

use sha2::{Digest as _, Sha256};
use tracing::debug;

use scour_types::{Digest, Result, ScourError};

/// Fixed header length shared by both index formats.
pub const HEADER_LEN: usize = 4096;

/// Byte range of the payload checksum inside the header.
const HEADER_CSUM_RANGE: std::ops::Range<usize> = 32..64;

/// Bytes per fixed-index record (one digest).
const FIXED_RECORD_LEN: usize = 32;

/// Bytes per dynamic-index record (u64-LE chunk offset + digest).
const DYNAMIC_RECORD_LEN: usize = 40;

/// Index flavor, recognized by key suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Fixed,
    Dynamic,
}

impl IndexKind {
    pub fn from_key(key: &str) -> Option<IndexKind> {
        if key.ends_with(".fidx") {
            Some(IndexKind::Fixed)
        } else if key.ends_with(".didx") {
            Some(IndexKind::Dynamic)
        } else {
            None
        }
    }
}

/// Decode an index body into its chunk digests after verifying the
/// checksum triple. Every failure here is fatal to the run: a partial
/// liveness picture must never feed the sweep.
pub fn digests(kind: IndexKind, key: &str, body: &[u8], declared_csum: &str) -> Result<Vec<Digest>> {
    verify_csums(key, body, declared_csum)?;
    let payload = &body[HEADER_LEN..];
    match kind {
        IndexKind::Fixed => fixed_digests(key, payload),
        IndexKind::Dynamic => dynamic_digests(key, payload),
    }
}

/// Require header-embedded, metadata-declared and recomputed payload
/// checksums to be identical lowercase hex.
fn verify_csums(key: &str, body: &[u8], declared: &str) -> Result<()> {
    if body.len() < HEADER_LEN {
        return Err(ScourError::ShortIndex {
            key: key.to_string(),
            len: body.len(),
        });
    }
    let embedded = hex::encode(&body[HEADER_CSUM_RANGE]);
    let computed = hex::encode(Sha256::digest(&body[HEADER_LEN..]));
    if embedded != computed || embedded != declared {
        return Err(ScourError::CorruptIndex {
            key: key.to_string(),
            embedded,
            declared: declared.to_string(),
            computed,
        });
    }
    Ok(())
}

fn fixed_digests(key: &str, payload: &[u8]) -> Result<Vec<Digest>> {
    if payload.len() % FIXED_RECORD_LEN != 0 {
        return Err(ScourError::UnalignedFixedIndex {
            key: key.to_string(),
            payload_len: payload.len(),
        });
    }
    Ok(payload
        .chunks_exact(FIXED_RECORD_LEN)
        .map(|rec| {
            let mut digest = [0u8; 32];
            digest.copy_from_slice(rec);
            Digest(digest)
        })
        .collect())
}

fn dynamic_digests(key: &str, payload: &[u8]) -> Result<Vec<Digest>> {
    if payload.len() % DYNAMIC_RECORD_LEN != 0 {
        return Err(ScourError::UnalignedDynamicIndex {
            key: key.to_string(),
            payload_len: payload.len(),
        });
    }
    let mut out = Vec::with_capacity(payload.len() / DYNAMIC_RECORD_LEN);
    for rec in payload.chunks_exact(DYNAMIC_RECORD_LEN) {
        // The offset only advances the cursor; liveness needs the digest.
        let offset = u64::from_le_bytes(rec[..8].try_into().unwrap());
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&rec[8..]);
        debug!("record at chunk offset {offset}: {}", hex::encode(digest));
        out.push(Digest(digest));
    }
    Ok(out)
}
