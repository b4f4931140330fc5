//! Backend Module
//!
//! Object storage abstraction used by the gateway. Implementations translate
//! their native failures into the closed [`BackendError`] set so that the
//! HTTP mapping never depends on a particular storage client library.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use thiserror::Error;

/// Streaming object body
pub type ObjectStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Failures reported by an object backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Upload rejected because no content length was supplied
    #[error("MissingContentLength")]
    MissingContentLength,

    /// Conditional fetch matched the supplied entity tag
    #[error("NotModified")]
    NotModified,

    #[error("NotFound: {message}")]
    NotFound { message: String },

    /// Any other error reported by the storage service
    #[error("{code}: {message}")]
    Service {
        code: String,
        message: String,
        cause: Option<String>,
    },

    /// Failure not typed by the storage service (I/O, transport, decoding)
    #[error("{0}")]
    Transport(String),
}

/// Object metadata copied into response headers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// Result of a successful read
pub struct GetObjectOutput {
    pub metadata: ObjectMetadata,
    pub body: ObjectStream,
}

/// Result of a successful write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutObjectOutput {
    pub etag: Option<String>,
}

/// Operations the gateway issues against object storage.
///
/// Handles are shared across concurrent requests; every call is independent.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Fetch an object and its metadata
    async fn get_object(&self, key: &str) -> Result<GetObjectOutput, BackendError>;

    /// Store `body` under `key`, replacing any existing object
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<PutObjectOutput, BackendError>;

    async fn delete_object(&self, key: &str) -> Result<(), BackendError>;

    /// Fetch metadata only. When `if_none_match` matches the current entity
    /// tag the call fails with [`BackendError::NotModified`].
    async fn head_object(
        &self,
        key: &str,
        if_none_match: Option<&str>,
    ) -> Result<ObjectMetadata, BackendError>;

    /// Short backend name used in log lines
    fn name(&self) -> &'static str;
}
