//! Error Module
//!
//! Defines the gateway error taxonomy, its HTTP status mapping, and the
//! translation from backend errors into client-facing errors.

use crate::backend::BackendError;
use hyper::StatusCode;
use thiserror::Error;

/// Main error type for the gateway
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("{0}")]
    BadRequest(String),

    /// `allow` lists the methods the path accepts
    #[error("{message}")]
    MethodNotAllowed {
        message: String,
        allow: &'static str,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("Object not modified")]
    NotModified,

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("An internal error occurred: {0}")]
    InternalError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),
}

impl GatewayError {
    /// HTTP status returned to the caller for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::NotModified => StatusCode::NOT_MODIFIED,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::InternalError(_)
            | GatewayError::ConfigError(_)
            | GatewayError::IoError(_)
            | GatewayError::HttpError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value of the `Allow` header sent with this error, if any
    pub fn allow(&self) -> Option<&'static str> {
        match self {
            GatewayError::MethodNotAllowed { allow, .. } => Some(*allow),
            _ => None,
        }
    }

    /// Translate a backend failure for `key` into the error sent to the caller.
    ///
    /// | Backend signal           | Status | Body                                       |
    /// |--------------------------|--------|--------------------------------------------|
    /// | missing content length   | 400    | `Bad Request`                              |
    /// | not modified             | 304    | none                                       |
    /// | not found                | 404    | key and backend message                    |
    /// | other service error      | 500    | code, message and cause when present       |
    /// | transport / untyped      | 500    | raw error text                             |
    pub fn from_backend(key: &str, err: BackendError) -> Self {
        match err {
            BackendError::MissingContentLength => {
                GatewayError::BadRequest("Bad Request".to_string())
            }
            BackendError::NotModified => GatewayError::NotModified,
            BackendError::NotFound { message } => {
                GatewayError::NotFound(format!("Path '{}' not found: {}", key, message))
            }
            BackendError::Service {
                code,
                message,
                cause,
            } => {
                let cause = cause
                    .map(|c| format!(" (Cause: {})", c))
                    .unwrap_or_default();
                GatewayError::InternalError(format!("{} = {}{}", code, message, cause))
            }
            BackendError::Transport(text) => GatewayError::InternalError(text),
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::IoError(err.to_string())
    }
}

impl From<hyper::Error> for GatewayError {
    fn from(err: hyper::Error) -> Self {
        GatewayError::HttpError(err.to_string())
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        GatewayError::ConfigError(err.to_string())
    }
}

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, GatewayError>;
