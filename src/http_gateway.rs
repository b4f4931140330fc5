//! HTTP Gateway Module
//!
//! Accepts HTTP/1 connections and maps each request onto an object operation
//! against the configured backend: GET reads, PUT writes, DELETE removes and
//! HEAD returns metadata. `GET /healthz` answers from the health gate.

use crate::{
    backend::{ObjectBackend, ObjectMetadata},
    config::Config,
    health::HealthGate,
    router::{self, Route},
    shutdown::ShutdownSignal,
    GatewayError, Result,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use http_body_util::{
    combinators::UnsyncBoxBody, BodyExt, Empty, Full, LengthLimitError, Limited, StreamBody,
};
use hyper::body::{Body, Frame};
use hyper::header::{self, HeaderMap};
use hyper::http::response::Builder;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Response body type produced by the gateway
pub type GatewayBody = UnsyncBoxBody<Bytes, std::io::Error>;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// How long the server waits for open connections after shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP gateway in front of an object backend
pub struct HttpGateway {
    backend: Arc<dyn ObjectBackend>,
    health: HealthGate,
    max_body_size: u64,
    active_connections: AtomicUsize,
}

impl HttpGateway {
    pub fn new(config: &Config, backend: Arc<dyn ObjectBackend>) -> Self {
        let health = HealthGate::new(
            Arc::clone(&backend),
            config.health.file.clone(),
            config.health.cache_interval(),
        );
        Self::with_health_gate(backend, health, config.server.max_body_size)
    }

    /// Build a gateway around an existing health gate (custom clocks in tests)
    pub fn with_health_gate(
        backend: Arc<dyn ObjectBackend>,
        health: HealthGate,
        max_body_size: u64,
    ) -> Self {
        Self {
            backend,
            health,
            max_body_size,
            active_connections: AtomicUsize::new(0),
        }
    }

    pub fn health_gate(&self) -> &HealthGate {
        &self.health
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind `listen_addr` and serve until shutdown
    pub async fn start(
        self: Arc<Self>,
        listen_addr: SocketAddr,
        shutdown_signal: ShutdownSignal,
    ) -> Result<()> {
        let listener = TcpListener::bind(listen_addr).await.map_err(|e| {
            GatewayError::IoError(format!("Failed to bind {}: {}", listen_addr, e))
        })?;
        info!(
            "HTTP gateway listening on {} (backend: {})",
            listen_addr,
            self.backend.name()
        );
        self.serve(listener, shutdown_signal).await
    }

    /// Accept connections from `listener` until shutdown, then drain
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown_signal: ShutdownSignal,
    ) -> Result<()> {
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!("HTTP connection from {}", addr);

                            if let Err(e) = stream.set_nodelay(true) {
                                warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                            }

                            let gateway = Arc::clone(&self);
                            tokio::spawn(async move {
                                gateway.serve_connection(stream, addr).await;
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept HTTP connection: {}", e);
                        }
                    }
                }
                _ = shutdown_signal.wait_for_shutdown() => {
                    info!("HTTP gateway received shutdown signal, stopping accept loop");
                    break;
                }
            }
        }

        let drain_start = Instant::now();
        let active = self.active_connections();
        if active > 0 {
            info!(
                "HTTP gateway draining {} active connections (timeout: {:?})",
                active, DRAIN_TIMEOUT
            );
            while self.active_connections() > 0 && drain_start.elapsed() < DRAIN_TIMEOUT {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            let remaining = self.active_connections();
            if remaining > 0 {
                warn!("HTTP gateway shutdown with {} connections still active", remaining);
            } else {
                info!("HTTP gateway all connections drained");
            }
        }

        info!("HTTP gateway stopped");
        Ok(())
    }

    /// Serve a single HTTP connection
    async fn serve_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let io = TokioIo::new(stream);
        self.active_connections.fetch_add(1, Ordering::Relaxed);

        let gateway = Arc::clone(&self);
        let service = service_fn(move |req| {
            let gateway = Arc::clone(&gateway);
            async move { Ok::<_, Infallible>(gateway.handle_request(req).await) }
        });

        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            let err_str = err.to_string();
            if err.is_incomplete_message()
                || err.is_canceled()
                || err_str.contains("connection closed")
                || err_str.contains("broken pipe")
                || err_str.contains("reset by peer")
            {
                debug!("Client disconnected from {}: {}", addr, err);
            } else {
                error!("Error serving HTTP connection from {}: {}", addr, err);
            }
        }

        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Handle a single HTTP request. Failures become plain-text error responses.
    pub async fn handle_request<B>(&self, req: Request<B>) -> Response<GatewayBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let start_time = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let response = match self.dispatch(req).await {
            Ok(response) => response,
            Err(err) => {
                if err.status_code().is_server_error() {
                    warn!("{} {} failed: {}", method, path, err);
                } else {
                    debug!("{} {} rejected: {}", method, path, err);
                }
                error_response(&err)
            }
        };

        debug!(
            "{} {} -> {} in {}ms",
            method,
            path,
            response.status().as_u16(),
            start_time.elapsed().as_millis()
        );
        response
    }

    async fn dispatch<B>(&self, req: Request<B>) -> Result<Response<GatewayBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let route = router::route(&parts.method, parts.uri.path())?;

        if let Some(key) = route.key() {
            info!("Handling {} request for '{}'", parts.method, key);
        }

        match route {
            Route::Health => self.serve_health().await,
            Route::Read(key) => self.serve_read(key).await,
            Route::Write(key) => self.serve_write(key, &parts.headers, body).await,
            Route::Remove(key) => self.serve_remove(key).await,
            Route::Metadata(key) => self.serve_metadata(key, &parts.headers).await,
        }
    }

    async fn serve_health(&self) -> Result<Response<GatewayBody>> {
        self.health.check().await?;
        Ok(build_response(
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, TEXT_PLAIN),
            full_body("OK"),
        ))
    }

    /// Stream the object body to the caller
    async fn serve_read(&self, key: &str) -> Result<Response<GatewayBody>> {
        let output = self
            .backend
            .get_object(key)
            .await
            .map_err(|e| GatewayError::from_backend(key, e))?;

        let body = StreamBody::new(output.body.map_ok(Frame::data)).boxed_unsync();
        Ok(build_response(
            with_metadata(Response::builder().status(StatusCode::OK), &output.metadata),
            body,
        ))
    }

    /// Buffer the request body (bounded by `max_body_size`) and store it
    async fn serve_write<B>(
        &self,
        key: &str,
        headers: &HeaderMap,
        body: B,
    ) -> Result<Response<GatewayBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if let Some(declared) = declared_length(headers) {
            if declared > self.max_body_size {
                return Err(self.too_large());
            }
        }

        let limit = usize::try_from(self.max_body_size).unwrap_or(usize::MAX);
        let data = match Limited::new(body, limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return Err(self.too_large());
            }
            Err(e) => return Err(GatewayError::InternalError(e.to_string())),
        };

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());

        let output = self
            .backend
            .put_object(key, data, content_type)
            .await
            .map_err(|e| GatewayError::from_backend(key, e))?;

        // 201 even when an existing object was replaced
        let mut builder = Response::builder()
            .status(StatusCode::CREATED)
            .header(header::LOCATION, format!("/{}", key));
        if let Some(etag) = output.etag {
            builder = builder.header(header::ETAG, etag);
        }
        Ok(build_response(builder, empty_body()))
    }

    async fn serve_remove(&self, key: &str) -> Result<Response<GatewayBody>> {
        self.backend
            .delete_object(key)
            .await
            .map_err(|e| GatewayError::from_backend(key, e))?;

        Ok(build_response(
            Response::builder().status(StatusCode::NO_CONTENT),
            empty_body(),
        ))
    }

    /// Headers only. A caller-supplied `If-None-Match` (or `ETag`) header is
    /// forwarded as the backend precondition.
    async fn serve_metadata(
        &self,
        key: &str,
        headers: &HeaderMap,
    ) -> Result<Response<GatewayBody>> {
        let condition = headers
            .get(header::IF_NONE_MATCH)
            .or_else(|| headers.get(header::ETAG))
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty());

        let metadata = self
            .backend
            .head_object(key, condition)
            .await
            .map_err(|e| GatewayError::from_backend(key, e))?;

        Ok(build_response(
            with_metadata(Response::builder().status(StatusCode::OK), &metadata),
            empty_body(),
        ))
    }

    fn too_large(&self) -> GatewayError {
        GatewayError::PayloadTooLarge(format!(
            "Request body exceeds the maximum size of {} bytes",
            self.max_body_size
        ))
    }
}

/// Plain-text error response; 304 carries no body
pub fn error_response(err: &GatewayError) -> Response<GatewayBody> {
    let status = err.status_code();
    if status == StatusCode::NOT_MODIFIED {
        return build_response(Response::builder().status(status), empty_body());
    }

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, TEXT_PLAIN)
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff");
    if let Some(allow) = err.allow() {
        builder = builder.header(header::ALLOW, allow);
    }
    build_response(builder, full_body(format!("{}\n", err)))
}

/// Copy backend metadata into response headers
fn with_metadata(mut builder: Builder, metadata: &ObjectMetadata) -> Builder {
    if let Some(content_type) = &metadata.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type.as_str());
    }
    if let Some(length) = metadata.content_length {
        builder = builder.header(header::CONTENT_LENGTH, length);
    }
    if let Some(last_modified) = &metadata.last_modified {
        builder = builder.header(header::LAST_MODIFIED, http_date(last_modified));
    }
    if let Some(etag) = &metadata.etag {
        builder = builder.header(header::ETAG, etag.as_str());
    }
    builder
}

/// IMF-fixdate as used by Last-Modified
pub fn http_date(timestamp: &DateTime<Utc>) -> String {
    timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn build_response(builder: Builder, body: GatewayBody) -> Response<GatewayBody> {
    builder.body(body).unwrap_or_else(|e| {
        error!("Failed to build response: {}", e);
        let mut response = Response::new(empty_body());
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

fn full_body(data: impl Into<Bytes>) -> GatewayBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn empty_body() -> GatewayBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}
