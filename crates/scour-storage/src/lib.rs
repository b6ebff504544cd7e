pub mod retry;
pub mod s3_store;

use std::collections::HashMap;

use scour_types::Result;

pub use rusty_s3::UrlStyle;
pub use s3_store::S3Store;

/// Metadata key carrying an index object's content checksum. The listing
/// layer lowercases header names, so lookups use this form.
pub const CSUM_META: &str = "x-amz-meta-csum";

/// A listed object: key plus, when requested, its user metadata.
#[derive(Debug, Clone, Default)]
pub struct ObjectInfo {
    pub key: String,
    /// User metadata under lowercased header names (`x-amz-meta-...`).
    pub user_metadata: HashMap<String, String>,
}

impl ObjectInfo {
    pub fn from_key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            user_metadata: HashMap::new(),
        }
    }

    /// Look up a user metadata value by its lowercased header name.
    pub fn user_meta(&self, name: &str) -> Option<&str> {
        self.user_metadata.get(name).map(String::as_str)
    }
}

/// A failed removal, reported per object by [`ObjectStore::remove_many`].
#[derive(Debug)]
pub struct RemoveError {
    pub key: String,
    pub reason: String,
}

/// Abstract object storage as the collector consumes it.
/// Keys are `/`-separated string paths (e.g. "chunks/ab01/cd02...").
pub trait ObjectStore: Send + Sync {
    /// Check that the configured bucket exists.
    fn bucket_exists(&self) -> Result<bool>;

    /// Recursively list all keys under a prefix. The returned iterator
    /// fetches lazily; with `with_metadata`, each item carries the object's
    /// user metadata.
    fn list<'a>(
        &'a self,
        prefix: &str,
        with_metadata: bool,
    ) -> Box<dyn Iterator<Item = Result<ObjectInfo>> + 'a>;

    /// Read an object in full. A missing key is an error, not a `None`:
    /// callers only fetch keys they have just listed.
    fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Write an object, overwriting any previous value.
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Delete a single object.
    fn remove(&self, key: &str) -> Result<()>;

    /// Delete a stream of objects, interleaving deletion with the
    /// producer's enumeration. Yields one `RemoveError` per failed object;
    /// failures do not stop the stream.
    fn remove_many<'a>(
        &'a self,
        objects: Box<dyn Iterator<Item = ObjectInfo> + 'a>,
    ) -> Box<dyn Iterator<Item = RemoveError> + 'a> {
        Box::new(objects.filter_map(move |obj| match self.remove(&obj.key) {
            Ok(()) => None,
            Err(e) => Some(RemoveError {
                key: obj.key,
                reason: e.to_string(),
            }),
        }))
    }
}
