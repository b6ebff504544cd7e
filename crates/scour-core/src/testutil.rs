use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use scour_storage::{ObjectInfo, ObjectStore};
use scour_types::{Result, ScourError};

struct StoredObject {
    data: Vec<u8>,
    user_metadata: HashMap<String, String>,
}

/// In-memory object store for tests. Thread-safe via Mutex; listing is
/// ordered for deterministic assertions.
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    /// Keys whose removal fails with a synthetic transport error.
    fail_removals: Mutex<HashSet<String>>,
    /// Keys whose write fails with a synthetic transport error.
    fail_puts: Mutex<HashSet<String>>,
    /// When set, `bucket_exists` answers false.
    bucket_missing: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            fail_removals: Mutex::new(HashSet::new()),
            fail_puts: Mutex::new(HashSet::new()),
            bucket_missing: AtomicBool::new(false),
        }
    }

    /// Insert an object without metadata.
    pub fn insert(&self, key: &str, data: &[u8]) {
        self.insert_with_meta(key, data, &[]);
    }

    /// Insert an object with user metadata (lowercased header names).
    pub fn insert_with_meta(&self, key: &str, data: &[u8], meta: &[(&str, &str)]) {
        let user_metadata = meta
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                user_metadata,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|o| o.data.clone())
    }

    pub fn fail_removal_of(&self, key: &str) {
        self.fail_removals.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_put_of(&self, key: &str) {
        self.fail_puts.lock().unwrap().insert(key.to_string());
    }

    pub fn set_bucket_missing(&self) {
        self.bucket_missing.store(true, Ordering::SeqCst);
    }
}

impl ObjectStore for MemoryStore {
    fn bucket_exists(&self) -> Result<bool> {
        Ok(!self.bucket_missing.load(Ordering::SeqCst))
    }

    fn list<'a>(
        &'a self,
        prefix: &str,
        with_metadata: bool,
    ) -> Box<dyn Iterator<Item = Result<ObjectInfo>> + 'a> {
        // Materialized up front: consumers delete while iterating, and the
        // snapshot keeps the listing stable under those mutations.
        let items: Vec<ObjectInfo> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| ObjectInfo {
                key: key.clone(),
                user_metadata: if with_metadata {
                    obj.user_metadata.clone()
                } else {
                    HashMap::new()
                },
            })
            .collect();
        Box::new(items.into_iter().map(Ok))
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| ScourError::NotFound(key.to_string()))
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        if self.fail_puts.lock().unwrap().contains(key) {
            return Err(ScourError::Transport(format!(
                "synthetic failure writing {key}"
            )));
        }
        self.insert(key, data);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        if self.fail_removals.lock().unwrap().contains(key) {
            return Err(ScourError::Transport(format!(
                "synthetic failure removing {key}"
            )));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}
