//! S3 REST Gateway - HTTP front end for objects in an S3 bucket
//!
//! Maps `GET`/`PUT`/`DELETE`/`HEAD` on a URL path to the matching object
//! operation against a storage backend, and serves a cached liveness check on
//! `GET /healthz`.

pub mod backend;
pub mod config;
pub mod error;
pub mod health;
pub mod http_gateway;
pub mod logging;
pub mod memory_backend;
pub mod router;
pub mod s3_backend;
pub mod shutdown;

pub use error::{GatewayError, Result};
