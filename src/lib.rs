//! # trafficlog
//!
//! An Axum middleware that logs every HTTP request and response as a compact JSON record,
//! without changing a single byte of what the client receives.
//!
//! ## Features
//!
//! - **Byte-faithful capture**: the response is replayed through a recording wrapper that forwards
//!   every header, status and body write to the real response
//! - **Re-readable request bodies**: the request body is drained once and handed downstream intact
//! - **Configurable records**: body capture, `REQUEST:`/`RESPONSE:` prefixes and markers can be
//!   turned off independently
//! - **Extensible**: custom handlers decide where log lines go
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::post, Router};
//! use trafficlog::{LoggingHandler, TrafficLoggerConfig, TrafficLoggerLayer};
//! use tower::ServiceBuilder;
//!
//! async fn echo(body: String) -> String {
//!     body
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     tracing_subscriber::fmt()
//!         .with_max_level(tracing::Level::DEBUG)
//!         .init();
//!
//!     let layer = TrafficLoggerLayer::new(TrafficLoggerConfig::default(), LoggingHandler);
//!     let app = Router::new()
//!         .route("/echo", post(echo))
//!         .layer(ServiceBuilder::new().layer(layer));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! A `POST /echo` with body `hi` then logs
//!
//! ```text
//! REQUEST: {"method":"POST","path":"/echo","headers":{...},"body":"hi"}
//! RESPONSE: {"status":200,"headers":{"content-type":"text/plain; charset=utf-8"},"body":"hi"}
//! ```
//!
//! ## Custom Handlers
//!
//! Implement the [`TrafficHandler`] trait to send log lines somewhere else:
//!
//! ```rust
//! use trafficlog::{types::LogLine, TrafficHandler};
//!
//! #[derive(Debug)]
//! struct StdoutHandler;
//!
//! impl TrafficHandler for StdoutHandler {
//!     fn handle(&self, line: LogLine) {
//!         println!("[{}] {}", line.correlation_id, line.message);
//!     }
//! }
//! ```
//!
//! ## Writing responses directly
//!
//! Handlers that prefer an imperative style can build a [`BufferedResponse`] and wrap it in a
//! [`CapturingResponse`] to inspect what they wrote:
//!
//! ```rust
//! use std::io::Write;
//! use trafficlog::{BufferedResponse, CapturingResponse, WritableResponse};
//!
//! let mut response = CapturingResponse::new(BufferedResponse::new());
//! response.set_header("Content-Type", "text/plain").unwrap();
//! response.output_stream().write_all(b"Test response body").unwrap();
//!
//! assert_eq!(response.content(), "Test response body");
//! assert_eq!(response.headers()["Content-Type"], "text/plain");
//! ```

use axum::{body::Body, extract::Request, response::Response};
use serde::{Deserialize, Serialize};
use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::SystemTime,
};
use tower::{Layer, Service};
use tracing::{debug, error, instrument};

pub mod capture;
pub use capture::CapturingResponse;

pub mod charset;

pub mod error;
pub use error::CaptureError;

pub mod logging_handler;
pub use logging_handler::LoggingHandler;

pub mod request;
use request::capture_request;
pub use request::RequestSnapshot;

pub mod response;
pub use response::{BufferedResponse, ResponseHead, WritableResponse};

pub mod tap;
use tap::TappedBody;

pub mod types;
use types::{LogLine, Marker, RequestRecord, ResponseRecord};

/// Global atomic counter for correlation IDs and process start timestamp
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(1);
static PROCESS_START_TIME: std::sync::OnceLock<u64> = std::sync::OnceLock::new();

/// Generate a unique correlation ID combining process start time and counter
fn generate_correlation_id() -> u64 {
    let start_time = *PROCESS_START_TIME.get_or_init(|| {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    });

    let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);

    // High 32 bits: process start timestamp, Low 32 bits: counter
    (start_time << 32) | (counter & 0xFFFFFFFF)
}

/// Configuration for the traffic logging middleware.
///
/// Controls what is captured and how log lines are formatted. Deserializes with every field
/// optional, so it can be embedded in an application's own configuration file.
///
/// # Examples
///
/// ```rust
/// use trafficlog::TrafficLoggerConfig;
///
/// // Default configuration
/// let config = TrafficLoggerConfig::default();
///
/// // Bare JSON lines, no bodies
/// let config = TrafficLoggerConfig {
///     capture_request_body: false,
///     capture_response_body: false,
///     disable_prefix: true,
///     disable_marker: true,
/// };
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrafficLoggerConfig {
    /// Whether to capture request bodies
    pub capture_request_body: bool,
    /// Whether to capture response bodies
    pub capture_response_body: bool,
    /// Omit the `REQUEST: ` / `RESPONSE: ` prefix before the JSON record
    pub disable_prefix: bool,
    /// Do not tag log lines with a [`Marker`]
    pub disable_marker: bool,
}

impl Default for TrafficLoggerConfig {
    fn default() -> Self {
        Self {
            capture_request_body: true,
            capture_response_body: true,
            disable_prefix: false,
            disable_marker: false,
        }
    }
}

/// Trait for emitting captured traffic.
///
/// The middleware calls [`TrafficHandler::handle`] once for the request and once for the
/// response of every exchange, in that order. The response line is emitted when the response
/// body has been sent, from whichever task drives the body.
pub trait TrafficHandler: Send + Sync + 'static {
    /// Whether anything would be emitted. When this returns `false` the middleware passes the
    /// exchange through without capturing it.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Emit one log line.
    fn handle(&self, line: LogLine);
}

/// Tower layer for the traffic logging middleware.
///
/// # Examples
///
/// ```rust,no_run
/// use trafficlog::{LoggingHandler, TrafficLoggerConfig, TrafficLoggerLayer};
/// use axum::{routing::get, Router};
/// use tower::ServiceBuilder;
///
/// # async fn hello() -> &'static str { "Hello" }
/// # #[tokio::main]
/// # async fn main() {
/// let layer = TrafficLoggerLayer::new(TrafficLoggerConfig::default(), LoggingHandler);
///
/// let app = Router::new()
///     .route("/hello", get(hello))
///     .layer(ServiceBuilder::new().layer(layer));
///
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
/// axum::serve(listener, app).await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct TrafficLoggerLayer {
    config: TrafficLoggerConfig,
    handler: Arc<dyn TrafficHandler>,
}

impl TrafficLoggerLayer {
    /// Create a new traffic logger layer with the given configuration and handler.
    pub fn new<H: TrafficHandler>(config: TrafficLoggerConfig, handler: H) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }
}

impl<S> Layer<S> for TrafficLoggerLayer {
    type Service = TrafficLoggerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TrafficLoggerService {
            inner,
            config: self.config.clone(),
            handler: self.handler.clone(),
        }
    }
}

/// Tower service implementation for the traffic logging middleware.
///
/// Users typically don't interact with this type directly - it's created by
/// [`TrafficLoggerLayer`].
#[derive(Clone)]
pub struct TrafficLoggerService<S> {
    inner: S,
    config: TrafficLoggerConfig,
    handler: Arc<dyn TrafficHandler>,
}

impl<S> Service<Request> for TrafficLoggerService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    #[instrument(skip_all)]
    fn call(&mut self, request: Request) -> Self::Future {
        // The clone may not be ready; keep the one that was polled
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let config = self.config.clone();
        let handler = self.handler.clone();

        Box::pin(async move {
            if !handler.is_enabled() {
                return inner.call(request).await;
            }

            let correlation_id = generate_correlation_id();
            debug!(correlation_id = %correlation_id, "Starting request capture");

            let (request, snapshot) = capture_request(request, config.capture_request_body).await;
            emit(
                handler.as_ref(),
                &config,
                correlation_id,
                Marker::Request,
                &RequestRecord::from(&snapshot),
            );

            let response = inner.call(request).await?;
            debug!(correlation_id = %correlation_id, "Inner service response received");

            Ok(capture_response(
                response,
                config.capture_response_body,
                move |record| {
                    emit(
                        handler.as_ref(),
                        &config,
                        correlation_id,
                        Marker::Response,
                        &record,
                    )
                },
            ))
        })
    }
}

/// Replays the head of `response` through a [`CapturingResponse`] and returns the response to
/// send, with `on_complete` receiving its record.
///
/// The status, headers and body frames the client gets are the inner service's own. When
/// `capture_body` is set the body is wrapped in a [`TappedBody`] and the record is delivered once
/// that body finishes; otherwise it is delivered right away without a body.
fn capture_response(
    response: Response,
    capture_body: bool,
    on_complete: impl FnOnce(ResponseRecord) + Send + 'static,
) -> Response {
    let mut capture = CapturingResponse::new(ResponseHead::new());
    capture.set_status(response.status());
    for (name, value) in response.headers() {
        let replayed = match value.to_str() {
            Ok(text) => capture.add_header(name.as_str(), text).is_ok(),
            Err(_) => false,
        };
        if !replayed {
            // Opaque bytes cannot go through the string API
            capture
                .inner_mut()
                .headers_mut()
                .append(name.clone(), value.clone());
            capture.record_header(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
    }

    if !capture_body {
        on_complete(ResponseRecord::from_capture(&capture, false));
        return response;
    }

    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::new(TappedBody::new(body, capture, on_complete)))
}
