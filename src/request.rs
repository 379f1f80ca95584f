//! Request capture.
//!
//! The request body is a single-use stream, so it is drained into memory once. The downstream
//! handler receives a rebuilt request whose body replays exactly those bytes, and the same bytes
//! are decoded to text for the log record. If the body fails while it is drained, the rebuilt body
//! replays what was read and then fails the same way, so the handler sees the failure it would
//! have seen without capture.

use axum::{
    body::{Body, HttpBody},
    extract::{ConnectInfo, Request},
    http::{HeaderMap, Method, Uri},
};
use bytes::{Bytes, BytesMut};
use http_body::Frame;
use http_body_util::{BodyExt, StreamBody};
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, error};

use crate::{charset, response::body_with_trailers};

/// What was known about a request when it was captured.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    /// HTTP method (GET, POST, etc.)
    pub method: Method,
    /// Request URI as received
    pub uri: Uri,
    /// Copy of the request headers at capture time
    pub headers: HeaderMap,
    /// Peer address, when the server was started with connect info
    pub sender: Option<IpAddr>,
    /// Body decoded as text; `None` when body capture was not requested
    pub body: Option<String>,
}

/// Snapshots `request` and, if `capture_body` is set, drains its body.
///
/// Returns the request to hand downstream. Its body yields the same bytes (and trailers) as the
/// original. A body that is known to be empty is not polled at all and captures as `""`. A body
/// that fails partway captures the bytes read before the failure.
///
/// # Examples
///
/// ```rust
/// use axum::body::Body;
/// use http_body_util::BodyExt;
/// use trafficlog::request::capture_request;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let request = axum::http::Request::post("/echo").body(Body::from("ping"))?;
/// let (request, snapshot) = capture_request(request, true).await;
///
/// assert_eq!(snapshot.body.as_deref(), Some("ping"));
/// let body = request.into_body().collect().await?.to_bytes();
/// assert_eq!(body, "ping");
/// # Ok(())
/// # }
/// ```
pub async fn capture_request(request: Request, capture_body: bool) -> (Request, RequestSnapshot) {
    let sender = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let mut snapshot = RequestSnapshot {
        method: request.method().clone(),
        uri: request.uri().clone(),
        headers: request.headers().clone(),
        sender,
        body: None,
    };

    if !capture_body {
        return (request, snapshot);
    }

    let (parts, mut body) = request.into_parts();

    if body.is_end_stream() || body.size_hint().exact() == Some(0) {
        debug!("Request has no body to capture");
        snapshot.body = Some(String::new());
        return (Request::from_parts(parts, body), snapshot);
    }

    let mut buffer = BytesMut::new();
    let mut trailers = None;
    let mut failure = None;
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => match frame.into_data() {
                Ok(chunk) => buffer.extend_from_slice(&chunk),
                Err(frame) => {
                    if let Ok(frame_trailers) = frame.into_trailers() {
                        trailers = Some(frame_trailers);
                    }
                }
            },
            Err(e) => {
                error!(error = %e, "Stream error during request body capture");
                failure = Some(e);
                break;
            }
        }
    }
    let bytes = buffer.freeze();
    debug!(body_size = bytes.len(), "Request body captured");

    let label = charset::charset_from_headers(&parts.headers);
    snapshot.body = Some(charset::decode(&bytes, label.as_deref()));

    let replay = match failure {
        None => body_with_trailers(bytes, trailers),
        Some(e) => body_with_error(bytes, e),
    };
    (Request::from_parts(parts, replay), snapshot)
}

/// Builds a body that yields `data` and then fails with `error`.
fn body_with_error(data: Bytes, error: axum::Error) -> Body {
    let frames = [Ok(Frame::data(data)), Err(error)];
    Body::new(StreamBody::new(futures::stream::iter(frames)))
}
