use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::time::Duration;

use rusty_s3::actions::{ListObjectsV2, S3Action};
use rusty_s3::{Bucket, Credentials, UrlStyle};

use scour_types::{Result, ScourError};

use crate::retry::retry_http;
use crate::{ObjectInfo, ObjectStore};

/// Duration for presigned URL validity.
const PRESIGN_DURATION: Duration = Duration::from_secs(3600);

/// Header prefix marking user metadata on S3 responses.
const USER_META_PREFIX: &str = "x-amz-meta-";

/// S3-compatible object store speaking presigned REST requests.
pub struct S3Store {
    bucket: Bucket,
    bucket_name: String,
    credentials: Credentials,
    agent: ureq::Agent,
}

impl S3Store {
    pub fn new(
        endpoint: &str,
        use_ssl: bool,
        bucket_name: &str,
        region: &str,
        url_style: UrlStyle,
        access_key_id: &str,
        secret_access_key: &str,
    ) -> Result<Self> {
        let scheme = if use_ssl { "https" } else { "http" };
        let base_url = format!("{scheme}://{endpoint}")
            .parse()
            .map_err(|e| ScourError::Config(format!("invalid S3 endpoint '{endpoint}': {e}")))?;

        let bucket = Bucket::new(
            base_url,
            url_style,
            bucket_name.to_string(),
            region.to_string(),
        )
        .map_err(|e| ScourError::Config(format!("failed to create S3 bucket handle: {e}")))?;

        let credentials = Credentials::new(access_key_id, secret_access_key);

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(300))
            .build();

        Ok(Self {
            bucket,
            bucket_name: bucket_name.to_string(),
            credentials,
            agent,
        })
    }

    /// Map an HTTP failure onto the storage error taxonomy.
    fn op_error(op: &str, key: &str, e: ureq::Error) -> ScourError {
        match e {
            ureq::Error::Transport(t) => ScourError::Transport(format!("S3 {op} {key}: {t}")),
            ureq::Error::Status(404, _) => ScourError::NotFound(format!("S3 {op} {key}")),
            ureq::Error::Status(403, _) => ScourError::AccessDenied(format!("S3 {op} {key}")),
            ureq::Error::Status(code, _) => {
                ScourError::Storage(format!("S3 {op} {key}: status {code}"))
            }
        }
    }

    fn read_body(resp: ureq::Response) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        resp.into_reader()
            .read_to_end(&mut buf)
            .map_err(ScourError::Io)?;
        Ok(buf)
    }

    /// Fetch one page of a recursive listing.
    fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>)> {
        let mut action = self.bucket.list_objects_v2(Some(&self.credentials));
        action.query_mut().insert("prefix", prefix);
        if let Some(token) = continuation {
            action.query_mut().insert("continuation-token", token);
        }
        let url = action.sign(PRESIGN_DURATION);

        let resp = retry_http(&format!("LIST {prefix}"), || {
            self.agent.get(url.as_str()).call()
        })
        .map_err(|e| Self::op_error("LIST", prefix, e))?;
        let body = Self::read_body(resp)?;

        let body_str = std::str::from_utf8(&body).map_err(|e| {
            ScourError::Storage(format!("S3 LIST {prefix}: response not valid UTF-8: {e}"))
        })?;
        let parsed = ListObjectsV2::parse_response(body_str).map_err(|e| {
            ScourError::Storage(format!("S3 LIST {prefix}: failed to parse response: {e}"))
        })?;

        let keys = parsed
            .contents
            .iter()
            .map(|obj| obj.key.clone())
            // Skip directory markers
            .filter(|key| !key.ends_with('/'))
            .collect();
        Ok((keys, parsed.next_continuation_token))
    }

    /// HEAD an object and collect its user metadata headers.
    fn head_metadata(&self, key: &str) -> Result<HashMap<String, String>> {
        let url = self
            .bucket
            .head_object(Some(&self.credentials), key)
            .sign(PRESIGN_DURATION);

        let resp = retry_http(&format!("HEAD {key}"), || {
            self.agent.head(url.as_str()).call()
        })
        .map_err(|e| Self::op_error("HEAD", key, e))?;

        let mut meta = HashMap::new();
        for name in resp.headers_names() {
            let lowered = name.to_ascii_lowercase();
            if lowered.starts_with(USER_META_PREFIX) {
                if let Some(value) = resp.header(&name) {
                    meta.insert(lowered, value.to_string());
                }
            }
        }
        Ok(meta)
    }
}

impl ObjectStore for S3Store {
    fn bucket_exists(&self) -> Result<bool> {
        // A one-key listing doubles as a bucket probe: a missing bucket
        // answers 404 (NoSuchBucket).
        let mut action = self.bucket.list_objects_v2(Some(&self.credentials));
        action.query_mut().insert("max-keys", "1");
        let url = action.sign(PRESIGN_DURATION);

        match retry_http("LIST (bucket probe)", || {
            self.agent.get(url.as_str()).call()
        }) {
            Ok(_) => Ok(true),
            Err(ureq::Error::Status(404, _)) => Ok(false),
            Err(e) => Err(Self::op_error("LIST", &self.bucket_name, e)),
        }
    }

    fn list<'a>(
        &'a self,
        prefix: &str,
        with_metadata: bool,
    ) -> Box<dyn Iterator<Item = Result<ObjectInfo>> + 'a> {
        Box::new(ListIter {
            store: self,
            prefix: prefix.to_string(),
            with_metadata,
            pending: VecDeque::new(),
            continuation: None,
            done: false,
        })
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let url = self
            .bucket
            .get_object(Some(&self.credentials), key)
            .sign(PRESIGN_DURATION);

        let resp = retry_http(&format!("GET {key}"), || {
            self.agent.get(url.as_str()).call()
        })
        .map_err(|e| Self::op_error("GET", key, e))?;
        Self::read_body(resp)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let url = self
            .bucket
            .put_object(Some(&self.credentials), key)
            .sign(PRESIGN_DURATION);

        retry_http(&format!("PUT {key}"), || {
            self.agent.put(url.as_str()).send_bytes(data)
        })
        .map_err(|e| Self::op_error("PUT", key, e))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let url = self
            .bucket
            .delete_object(Some(&self.credentials), key)
            .sign(PRESIGN_DURATION);

        retry_http(&format!("DELETE {key}"), || {
            self.agent.delete(url.as_str()).call()
        })
        .map_err(|e| Self::op_error("DELETE", key, e))?;
        Ok(())
    }
}

/// Lazy recursive listing: pages are fetched on demand, metadata per key
/// only when the key is yielded.
struct ListIter<'a> {
    store: &'a S3Store,
    prefix: String,
    with_metadata: bool,
    pending: VecDeque<String>,
    continuation: Option<String>,
    done: bool,
}

impl Iterator for ListIter<'_> {
    type Item = Result<ObjectInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(key) = self.pending.pop_front() {
                if !self.with_metadata {
                    return Some(Ok(ObjectInfo::from_key(key)));
                }
                return Some(
                    self.store
                        .head_metadata(&key)
                        .map(|user_metadata| ObjectInfo { key, user_metadata }),
                );
            }
            if self.done {
                return None;
            }
            match self
                .store
                .list_page(&self.prefix, self.continuation.as_deref())
            {
                Ok((keys, next)) => {
                    self.pending.extend(keys);
                    match next {
                        Some(token) => self.continuation = Some(token),
                        None => self.done = true,
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
