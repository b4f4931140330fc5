//! S3 Backend Module
//!
//! Issues object operations against an S3 bucket with the AWS SDK and maps
//! SDK failures onto [`BackendError`].

use crate::backend::{
    BackendError, GetObjectOutput, ObjectBackend, ObjectMetadata, ObjectStream, PutObjectOutput,
};
use crate::config::S3Config;
use crate::{GatewayError, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream, DateTime as SmithyDateTime};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use hyper::StatusCode;
use tracing::{debug, info};

/// Object backend for a single S3 bucket
pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    /// Build a client from static credentials. Fails if the bucket or
    /// credentials are missing.
    pub fn new(config: &S3Config) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                GatewayError::ConfigError(
                    "Unable to start as AWS_BUCKET is not defined".to_string(),
                )
            })?;
        let access_key = config
            .access_key_id
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                GatewayError::ConfigError(
                    "Unable to start as AWS_ACCESS_KEY_ID is not defined".to_string(),
                )
            })?;
        let secret_key = config
            .secret_access_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                GatewayError::ConfigError(
                    "Unable to start as AWS_SECRET_ACCESS_KEY is not defined".to_string(),
                )
            })?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "s3-rest-gateway");

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);

        if let Some(endpoint) = &config.endpoint_url {
            debug!("Using custom S3 endpoint: {}", endpoint);
            builder = builder.endpoint_url(endpoint.as_str()).force_path_style(true);
        } else if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());
        info!(
            "S3 backend initialized (bucket: {}, region: {})",
            bucket, config.region
        );

        Ok(Self { client, bucket })
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn get_object(&self, key: &str) -> std::result::Result<GetObjectOutput, BackendError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(map_sdk_error)?;

        let metadata = ObjectMetadata {
            content_type: output.content_type().map(str::to_string),
            content_length: output.content_length().and_then(|l| u64::try_from(l).ok()),
            last_modified: output.last_modified().and_then(to_chrono),
            etag: output.e_tag().map(str::to_string),
        };

        Ok(GetObjectOutput {
            metadata,
            body: stream_body(output.body),
        })
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> std::result::Result<PutObjectOutput, BackendError> {
        let content_length = i64::try_from(body.len())
            .map_err(|e| BackendError::Transport(format!("Body length out of range: {}", e)))?;

        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(content_length)
            .set_content_type(content_type.map(str::to_string))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(PutObjectOutput {
            etag: output.e_tag().map(str::to_string),
        })
    }

    async fn delete_object(&self, key: &str) -> std::result::Result<(), BackendError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn head_object(
        &self,
        key: &str,
        if_none_match: Option<&str>,
    ) -> std::result::Result<ObjectMetadata, BackendError> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .set_if_none_match(if_none_match.map(str::to_string))
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(ObjectMetadata {
            content_type: output.content_type().map(str::to_string),
            content_length: output.content_length().and_then(|l| u64::try_from(l).ok()),
            last_modified: output.last_modified().and_then(to_chrono),
            etag: output.e_tag().map(str::to_string),
        })
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}

/// Adapt the SDK byte stream into a boxed stream of chunks
fn stream_body(body: ByteStream) -> ObjectStream {
    futures::stream::unfold(body, |mut body| async move {
        body.next()
            .await
            .map(|chunk| (chunk.map_err(std::io::Error::other), body))
    })
    .boxed()
}

fn to_chrono(timestamp: &SmithyDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

fn map_sdk_error<E>(err: SdkError<E, HttpResponse>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &err {
        // Errors reported by S3 itself carry no separate cause
        SdkError::ServiceError(context) => {
            let service_err = context.err();
            classify_service_error(
                context.raw().status().as_u16(),
                service_err.code(),
                service_err.message(),
            )
        }
        SdkError::DispatchFailure(_) => BackendError::Service {
            code: "RequestError".to_string(),
            message: "send request failed".to_string(),
            cause: std::error::Error::source(&err).map(source_chain),
        },
        SdkError::TimeoutError(_) => BackendError::Service {
            code: "RequestTimeout".to_string(),
            message: "request timed out".to_string(),
            cause: std::error::Error::source(&err).map(source_chain),
        },
        _ => BackendError::Transport(DisplayErrorContext(&err).to_string()),
    }
}

/// Render an error and every source below it, outermost first
fn source_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        let text = source.to_string();
        if !rendered.ends_with(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        current = source.source();
    }
    rendered
}

/// Classify a service error by its S3 error code, falling back to the HTTP
/// status for bodiless responses such as HEAD.
fn classify_service_error(
    status: u16,
    code: Option<&str>,
    message: Option<&str>,
) -> BackendError {
    match (code, status) {
        (Some("MissingContentLength"), _) | (None, 411) => BackendError::MissingContentLength,
        (Some("NotModified"), _) | (_, 304) => BackendError::NotModified,
        (Some("NoSuchKey") | Some("NotFound"), _) | (None, 404) => BackendError::NotFound {
            message: message.unwrap_or("Not Found").to_string(),
        },
        _ => {
            let reason = StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown");
            BackendError::Service {
                code: code.map(str::to_string).unwrap_or_else(|| status.to_string()),
                message: message.unwrap_or(reason).to_string(),
                cause: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_such_key_is_not_found() {
        let err = classify_service_error(
            404,
            Some("NoSuchKey"),
            Some("The specified key does not exist."),
        );
        assert_eq!(
            err,
            BackendError::NotFound {
                message: "The specified key does not exist.".to_string()
            }
        );
    }

    #[test]
    fn test_bodiless_head_404_is_not_found() {
        let err = classify_service_error(404, None, None);
        assert_eq!(
            err,
            BackendError::NotFound {
                message: "Not Found".to_string()
            }
        );
    }

    #[test]
    fn test_304_is_not_modified() {
        assert_eq!(
            classify_service_error(304, None, None),
            BackendError::NotModified
        );
        assert_eq!(
            classify_service_error(304, Some("NotModified"), None),
            BackendError::NotModified
        );
    }

    #[test]
    fn test_missing_content_length() {
        assert_eq!(
            classify_service_error(411, Some("MissingContentLength"), None),
            BackendError::MissingContentLength
        );
    }

    #[test]
    fn test_other_codes_are_service_errors() {
        let err = classify_service_error(
            403,
            Some("AccessDenied"),
            Some("Access Denied"),
        );
        assert_eq!(
            err,
            BackendError::Service {
                code: "AccessDenied".to_string(),
                message: "Access Denied".to_string(),
                cause: None,
            }
        );
    }

    #[test]
    fn test_codeless_error_uses_status() {
        let err = classify_service_error(503, None, None);
        assert_eq!(
            err,
            BackendError::Service {
                code: "503".to_string(),
                message: "Service Unavailable".to_string(),
                cause: None,
            }
        );
    }

    #[test]
    fn test_source_chain_includes_root_cause() {
        let root = std::io::Error::other("connection refused");
        assert_eq!(
            source_chain(&Wrapped(root)),
            "io error: connection refused"
        );
    }

    #[derive(Debug)]
    struct Wrapped(std::io::Error);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("io error")
        }
    }

    impl std::error::Error for Wrapped {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_missing_bucket_is_config_error() {
        let config = S3Config {
            bucket: None,
            access_key_id: Some("id".to_string()),
            secret_access_key: Some("secret".to_string()),
            ..S3Config::default()
        };
        match S3Backend::new(&config) {
            Err(GatewayError::ConfigError(msg)) => assert!(msg.contains("AWS_BUCKET")),
            _ => panic!("expected configuration error"),
        }
    }

    #[test]
    fn test_missing_secret_is_config_error() {
        let config = S3Config {
            bucket: Some("bucket".to_string()),
            access_key_id: Some("id".to_string()),
            secret_access_key: None,
            ..S3Config::default()
        };
        match S3Backend::new(&config) {
            Err(GatewayError::ConfigError(msg)) => assert!(msg.contains("AWS_SECRET_ACCESS_KEY")),
            _ => panic!("expected configuration error"),
        }
    }
}
