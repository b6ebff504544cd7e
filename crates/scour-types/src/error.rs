use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScourError>;

#[derive(Debug, Error)]
pub enum ScourError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("bucket '{0}' does not exist")]
    BucketNotFound(String),

    #[error("no snapshots found in bucket '{0}'")]
    NoSnapshots(String),

    #[error("lock is held by '{0}'")]
    Locked(String),

    #[error("timed out acquiring lock '{0}'")]
    LockTimeout(String),

    #[error(
        "corrupted index file '{key}': checksum in index [{embedded}] or metadata sum \
         [{declared}] does not match calculated checksum [{computed}]"
    )]
    CorruptIndex {
        key: String,
        embedded: String,
        declared: String,
        computed: String,
    },

    #[error("index object '{key}' is too small ({len} bytes)")]
    ShortIndex { key: String, len: usize },

    #[error("fixed index '{key}': data after header is not 32 bytes aligned ({payload_len} bytes)")]
    UnalignedFixedIndex { key: String, payload_len: usize },

    #[error(
        "dynamic index '{key}': data after header is not 40 bytes aligned ({payload_len} bytes)"
    )]
    UnalignedDynamicIndex { key: String, payload_len: usize },

    #[error("index object '{0}' has no csum metadata set")]
    MissingCsum(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
