use std::fmt;

use crate::error::{Result, ScourError};

/// Prefix under which chunk blobs are stored.
pub const CHUNKS_PREFIX: &str = "chunks/";

/// A 32-byte content address for a chunk blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Hex-encode the full digest for storage keys and log lines.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a digest from a 64-character lowercase hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| ScourError::Malformed(format!("invalid digest hex: {e}")))?;
        if bytes.len() != 32 {
            return Err(ScourError::Malformed(format!(
                "expected 32 digest bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Digest(arr))
    }

    /// Storage key of the chunk blob: `chunks/<first-4-hex>/<rest-60-hex>`.
    pub fn chunk_key(&self) -> String {
        let h = self.to_hex();
        format!("{CHUNKS_PREFIX}{}/{}", &h[..4], &h[4..])
    }

    /// Recover a digest from a chunk storage key by stripping the `chunks/`
    /// prefix and deleting the shard separators.
    pub fn from_chunk_key(key: &str) -> Result<Self> {
        let rest = key
            .strip_prefix(CHUNKS_PREFIX)
            .ok_or_else(|| ScourError::Malformed(format!("not a chunk key: '{key}'")))?;
        Self::from_hex(&rest.replace('/', ""))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}
