//! Request Router
//!
//! Maps an HTTP method and URL path onto exactly one gateway operation.

use crate::GatewayError;
use hyper::Method;

/// Path (without the leading separator) of the liveness endpoint
pub const HEALTH_PATH: &str = "healthz";

/// Methods accepted on the health path
pub const HEALTH_METHODS: &str = "GET";

/// Methods accepted on object keys
pub const OBJECT_METHODS: &str = "GET, PUT, DELETE, HEAD";

/// Operation selected for a request. Keys borrow from the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Health,
    Read(&'a str),
    Write(&'a str),
    Remove(&'a str),
    Metadata(&'a str),
}

impl Route<'_> {
    /// Object key targeted by this route, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            Route::Health => None,
            Route::Read(key) | Route::Write(key) | Route::Remove(key) | Route::Metadata(key) => {
                Some(key)
            }
        }
    }
}

/// Strip the single leading `/` from a URL path. The remainder is the object
/// key, passed through without decoding or other normalization.
pub fn object_key(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

pub fn route<'a>(method: &Method, path: &'a str) -> Result<Route<'a>, GatewayError> {
    let key = object_key(path);

    if key.is_empty() {
        return Err(GatewayError::BadRequest("Path must be provided".to_string()));
    }

    if key == HEALTH_PATH {
        return if *method == Method::GET {
            Ok(Route::Health)
        } else {
            Err(GatewayError::MethodNotAllowed {
                message: format!("/{} is restricted to GET requests", HEALTH_PATH),
                allow: HEALTH_METHODS,
            })
        };
    }

    match *method {
        Method::GET => Ok(Route::Read(key)),
        Method::PUT => Ok(Route::Write(key)),
        Method::DELETE => Ok(Route::Remove(key)),
        Method::HEAD => Ok(Route::Metadata(key)),
        _ => Err(GatewayError::MethodNotAllowed {
            message: format!("Method {} not supported", method),
            allow: OBJECT_METHODS,
        }),
    }
}
