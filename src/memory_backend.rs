//! Memory Backend Module
//!
//! In-process object store with S3-like semantics. Used for local runs
//! without a bucket and as the backend in tests, where its per-operation
//! call counters let callers assert how often storage was contacted.

use crate::backend::{
    BackendError, GetObjectOutput, ObjectBackend, ObjectMetadata, PutObjectOutput,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

/// Objects larger than this are streamed back in several chunks
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    last_modified: DateTime<Utc>,
    etag: String,
}

impl StoredObject {
    fn metadata(&self) -> ObjectMetadata {
        ObjectMetadata {
            content_type: Some(self.content_type.clone()),
            content_length: Some(self.data.len() as u64),
            last_modified: Some(self.last_modified),
            etag: Some(self.etag.clone()),
        }
    }
}

/// Per-operation call counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get: usize,
    pub put: usize,
    pub delete: usize,
    pub head: usize,
}

#[derive(Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<String, StoredObject>>,
    unavailable: AtomicBool,
    get_calls: AtomicUsize,
    put_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    head_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every operation fails as if the service were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn call_counts(&self) -> CallCounts {
        CallCounts {
            get: self.get_calls.load(Ordering::SeqCst),
            put: self.put_calls.load(Ordering::SeqCst),
            delete: self.delete_calls.load(Ordering::SeqCst),
            head: self.head_calls.load(Ordering::SeqCst),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .read()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Service {
                code: "ServiceUnavailable".to_string(),
                message: "Service is unable to handle request".to_string(),
                cause: None,
            });
        }
        Ok(())
    }

    fn lookup(&self, key: &str) -> Result<StoredObject, BackendError> {
        let objects = self.objects.read().map_err(poisoned)?;
        objects.get(key).cloned().ok_or_else(|| BackendError::NotFound {
            message: "The specified key does not exist.".to_string(),
        })
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn get_object(&self, key: &str) -> Result<GetObjectOutput, BackendError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let object = self.lookup(key)?;

        let chunks: Vec<std::io::Result<Bytes>> = (0..object.data.len())
            .step_by(CHUNK_SIZE)
            .map(|start| {
                let end = (start + CHUNK_SIZE).min(object.data.len());
                Ok(object.data.slice(start..end))
            })
            .collect();

        Ok(GetObjectOutput {
            metadata: object.metadata(),
            body: futures::stream::iter(chunks).boxed(),
        })
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<PutObjectOutput, BackendError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let etag = entity_tag(&body);
        let object = StoredObject {
            data: body,
            content_type: content_type.unwrap_or("binary/octet-stream").to_string(),
            last_modified: Utc::now(),
            etag: etag.clone(),
        };
        self.objects
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), object);

        Ok(PutObjectOutput { etag: Some(etag) })
    }

    async fn delete_object(&self, key: &str) -> Result<(), BackendError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        // Deleting a missing key succeeds, as it does on S3
        self.objects.write().map_err(poisoned)?.remove(key);
        Ok(())
    }

    async fn head_object(
        &self,
        key: &str,
        if_none_match: Option<&str>,
    ) -> Result<ObjectMetadata, BackendError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let object = self.lookup(key)?;

        if let Some(condition) = if_none_match {
            if etag_matches(condition, &object.etag) {
                return Err(BackendError::NotModified);
            }
        }

        Ok(object.metadata())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Quoted entity tag derived from the object content
fn entity_tag(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let hex: String = digest[..16].iter().map(|b| format!("{:02x}", b)).collect();
    format!("\"{}\"", hex)
}

/// If-None-Match comparison: `*` or any listed tag, quotes optional
fn etag_matches(condition: &str, etag: &str) -> bool {
    let etag = etag.trim_matches('"');
    condition.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/").trim_matches('"') == etag
    })
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> BackendError {
    BackendError::Transport("object map lock poisoned".to_string())
}
