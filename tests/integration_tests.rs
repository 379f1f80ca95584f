use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use futures::{stream, StreamExt};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::{
    collections::HashSet,
    convert::Infallible,
    fmt::Write as _,
    io::Write as _,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::time::timeout;
use tower::{ServiceBuilder, ServiceExt};
use trafficlog::{
    types::{LogLine, Marker},
    BufferedResponse, TrafficHandler, TrafficLoggerConfig, TrafficLoggerLayer, WritableResponse,
};

/// Test handler that collects every emitted line for verification
#[derive(Debug, Clone)]
struct TestHandler {
    lines: Arc<Mutex<Vec<LogLine>>>,
    enabled: Arc<AtomicBool>,
}

impl TestHandler {
    fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    fn disabled() -> Self {
        let handler = Self::new();
        handler.enabled.store(false, Ordering::SeqCst);
        handler
    }

    fn get_lines(&self) -> Vec<LogLine> {
        self.lines.lock().unwrap().clone()
    }
}

impl TrafficHandler for TestHandler {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn handle(&self, line: LogLine) {
        self.lines.lock().unwrap().push(line);
    }
}

/// Parses the JSON record of a line, stripping the prefix when there is one
fn record(line: &LogLine) -> Value {
    let json = line
        .message
        .strip_prefix("REQUEST: ")
        .or_else(|| line.message.strip_prefix("RESPONSE: "))
        .unwrap_or(&line.message);
    serde_json::from_str(json).unwrap()
}

// Test server handlers
async fn hello_handler() -> impl IntoResponse {
    "Hello, World!"
}

async fn echo_handler(body: Bytes) -> impl IntoResponse {
    body
}

async fn byte_sink_handler() -> BufferedResponse {
    let mut response = BufferedResponse::new();
    response
        .output_stream()
        .write_all("Test response body".as_bytes())
        .unwrap();
    response
}

async fn headers_handler() -> BufferedResponse {
    let mut response = BufferedResponse::new();
    response.set_status_with_message(StatusCode::CREATED, "Made it");
    response.add_header("X-Trace", "a").unwrap();
    response.add_header("X-Trace", "b").unwrap();
    response.set_int_header("X-Count", 3).unwrap();
    response.output_stream().write_all(b"created").unwrap();
    response
}

async fn mixed_writes_handler() -> BufferedResponse {
    let mut response = BufferedResponse::new();
    response.set_header("Content-Type", "text/plain").unwrap();
    response.output_stream().write_all(b"bytes,").unwrap();
    write!(response.writer(), "text,").unwrap();
    response.output_stream().write_all(b"bytes").unwrap();
    response
}

async fn latin1_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=ISO-8859-1")],
        vec![0x63u8, 0x61, 0x66, 0xE9],
    )
}

async fn streaming_handler() -> impl IntoResponse {
    let stream = stream::iter(vec![
        Ok::<_, std::convert::Infallible>(Bytes::from("chunk1")),
        Ok(Bytes::from("chunk2")),
        Ok(Bytes::from("chunk3")),
    ]);

    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn broken_handler() -> impl IntoResponse {
    Body::from_stream(broken_stream())
}

/// Server-sent style stream that sends one event and then stays open
async fn pending_handler() -> impl IntoResponse {
    let events = stream::iter(vec![Ok::<_, Infallible>(Bytes::from("event: first\n"))])
        .chain(stream::pending());
    Body::from_stream(events)
}

fn broken_stream() -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> {
    stream::iter(vec![
        Ok(Bytes::from("partial")),
        Err(std::io::Error::other("upstream reset")),
    ])
}

fn create_test_app(handler: TestHandler, config: TrafficLoggerConfig) -> Router {
    Router::new()
        .route("/hello", get(hello_handler))
        .route("/echo", post(echo_handler))
        .route("/test", post(byte_sink_handler))
        .route("/headers", get(headers_handler))
        .route("/mixed", get(mixed_writes_handler))
        .route("/latin1", get(latin1_handler))
        .route("/streaming", get(streaming_handler))
        .route("/broken", get(broken_handler))
        .route("/pending", get(pending_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TrafficLoggerLayer::new(config, handler))
                .into_inner(),
        )
}

fn test_server(handler: &TestHandler, config: TrafficLoggerConfig) -> axum_test::TestServer {
    axum_test::TestServer::new(create_test_app(handler.clone(), config)).unwrap()
}

#[tokio::test]
async fn test_form_post_is_logged_and_delivered() {
    let handler = TestHandler::new();
    let server = test_server(&handler, TrafficLoggerConfig::default());

    let response = server
        .post("/echo")
        .add_header(
            HeaderName::from_static("accept"),
            HeaderValue::from_static("application/json"),
        )
        .content_type("application/x-www-form-urlencoded")
        .bytes(Bytes::from_static(b"field1=1000&field2=2000"))
        .await;

    // The handler read the same body the logger captured
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "field1=1000&field2=2000");

    let lines = handler.get_lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].correlation_id, lines[1].correlation_id);

    let request = &lines[0];
    assert_eq!(request.marker, Some(Marker::Request));
    assert!(request.message.starts_with("REQUEST: {"));
    let request = record(request);
    assert_eq!(request["method"], "POST");
    assert!(request["path"].as_str().unwrap().ends_with("/echo"));
    assert_eq!(request["headers"]["accept"], "application/json");
    assert_eq!(
        request["headers"]["content-type"],
        "application/x-www-form-urlencoded"
    );
    assert_eq!(request["body"], "field1=1000&field2=2000");

    let response = &lines[1];
    assert_eq!(response.marker, Some(Marker::Response));
    assert!(response.message.starts_with("RESPONSE: {"));
    let response = record(response);
    assert_eq!(response["status"], 200);
    assert_eq!(response["body"], "field1=1000&field2=2000");
}

#[tokio::test]
async fn test_response_written_through_byte_sink() {
    let handler = TestHandler::new();
    let server = test_server(&handler, TrafficLoggerConfig::default());

    let response = server.post("/test").text("ignored").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "Test response body");

    let lines = handler.get_lines();
    assert_eq!(lines.len(), 2);
    let response = record(&lines[1]);
    assert_eq!(response["status"], 200);
    assert_eq!(response["body"], "Test response body");
}

#[tokio::test]
async fn test_status_and_headers_are_captured() {
    let handler = TestHandler::new();
    let server = test_server(&handler, TrafficLoggerConfig::default());

    let response = server.get("/headers").await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    assert_eq!(response.text(), "created");

    // The client still receives every value
    let traces: Vec<_> = response.headers().get_all("x-trace").iter().collect();
    assert_eq!(traces, vec!["a", "b"]);

    let lines = handler.get_lines();
    let response = record(&lines[1]);
    assert_eq!(response["status"], 201);
    assert_eq!(response["headers"]["x-trace"], "b");
    assert_eq!(response["headers"]["x-count"], "3");
    assert_eq!(response["body"], "created");
}

#[tokio::test]
async fn test_mixed_byte_and_text_writes() {
    let handler = TestHandler::new();
    let server = test_server(&handler, TrafficLoggerConfig::default());

    let response = server.get("/mixed").await;
    assert_eq!(response.text(), "bytes,text,bytes");

    let lines = handler.get_lines();
    assert_eq!(record(&lines[1])["body"], "bytes,text,bytes");
}

#[tokio::test]
async fn test_body_decoded_with_declared_charset() {
    let handler = TestHandler::new();
    let server = test_server(&handler, TrafficLoggerConfig::default());

    let response = server.get("/latin1").await;
    assert_eq!(response.as_bytes().as_ref(), &[0x63, 0x61, 0x66, 0xE9]);

    let lines = handler.get_lines();
    assert_eq!(record(&lines[1])["body"], "café");
}

#[tokio::test]
async fn test_streaming_response_capture() {
    let handler = TestHandler::new();
    let server = test_server(&handler, TrafficLoggerConfig::default());

    let response = server.get("/streaming").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "chunk1chunk2chunk3");

    let lines = handler.get_lines();
    let response = record(&lines[1]);
    assert_eq!(response["headers"]["content-type"], "text/plain");
    assert_eq!(response["body"], "chunk1chunk2chunk3");
}

#[tokio::test]
async fn test_streamed_chunks_are_not_held_back() {
    let handler = TestHandler::new();
    let app = create_test_app(handler.clone(), TrafficLoggerConfig::default());

    let request = axum::http::Request::get("/pending")
        .body(Body::empty())
        .unwrap();
    let response = timeout(Duration::from_secs(2), app.oneshot(request))
        .await
        .expect("response head was held back")
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body();
    let frame = timeout(Duration::from_secs(2), body.frame())
        .await
        .expect("first chunk was held back")
        .unwrap()
        .unwrap();
    assert_eq!(frame.into_data().unwrap(), "event: first\n");

    // The stream is still open, so only the request has been logged
    assert_eq!(handler.get_lines().len(), 1);

    // A client going away still yields the response record
    drop(body);
    let lines = handler.get_lines();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1].marker, Some(Marker::Response));
    assert_eq!(record(&lines[1])["body"], "event: first\n");
}

#[tokio::test]
async fn test_broken_response_body_reaches_client_unchanged() {
    let handler = TestHandler::new();
    let app = create_test_app(handler.clone(), TrafficLoggerConfig::default());

    let request = axum::http::Request::get("/broken")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The client sees the partial body and then the same failure
    let mut body = response.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    assert_eq!(frame.into_data().unwrap(), "partial");
    assert!(body.frame().await.unwrap().is_err());

    let lines = handler.get_lines();
    assert_eq!(lines.len(), 2);
    let response = record(&lines[1]);
    assert_eq!(response["status"], 200);
    assert_eq!(response["body"], "partial");
}

#[tokio::test]
async fn test_broken_request_body_is_left_to_the_handler() {
    let handler = TestHandler::new();
    let app = create_test_app(handler.clone(), TrafficLoggerConfig::default());

    // A handler that never reads the body answers as usual
    let request = axum::http::Request::get("/hello")
        .body(Body::from_stream(broken_stream()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, "Hello, World!");

    // An extractor reading it rejects the request itself
    let request = axum::http::Request::post("/echo")
        .body(Body::from_stream(broken_stream()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    drop(response);

    let lines = handler.get_lines();
    assert_eq!(lines.len(), 4);
    assert_eq!(record(&lines[0])["body"], "partial");
    assert_eq!(record(&lines[2])["body"], "partial");
}

#[tokio::test]
async fn test_empty_request_body() {
    let handler = TestHandler::new();
    let server = test_server(&handler, TrafficLoggerConfig::default());

    let response = server.get("/hello").await;
    assert_eq!(response.text(), "Hello, World!");

    let lines = handler.get_lines();
    let request = record(&lines[0]);
    assert_eq!(request["method"], "GET");
    assert_eq!(request["body"], "");

    let response = record(&lines[1]);
    assert_eq!(response["body"], "Hello, World!");
    assert_eq!(
        response["headers"]["content-type"],
        "text/plain; charset=utf-8"
    );
}

#[tokio::test]
async fn test_config_disable_capture() {
    let handler = TestHandler::new();
    let config = TrafficLoggerConfig {
        capture_request_body: false,
        capture_response_body: false,
        ..TrafficLoggerConfig::default()
    };
    let server = test_server(&handler, config);

    let response = server.post("/echo").text("test body").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "test body");

    let lines = handler.get_lines();
    assert_eq!(lines.len(), 2);

    // Bodies should not be captured
    let request = record(&lines[0]);
    assert_eq!(request.get("body"), None);
    let response = record(&lines[1]);
    assert_eq!(response["status"], 200);
    assert_eq!(response.get("body"), None);
}

#[tokio::test]
async fn test_json_only_lines() {
    let handler = TestHandler::new();
    let config = TrafficLoggerConfig {
        disable_prefix: true,
        disable_marker: true,
        ..TrafficLoggerConfig::default()
    };
    let server = test_server(&handler, config);

    server.post("/test").await;

    let lines = handler.get_lines();
    assert_eq!(lines.len(), 2);
    for line in &lines {
        assert_eq!(line.marker, None);
        assert!(line.message.starts_with('{'));
    }
    assert_eq!(
        record(&lines[1]).get("body"),
        Some(&json!("Test response body"))
    );
}

#[tokio::test]
async fn test_marker_only_lines() {
    let handler = TestHandler::new();
    let config = TrafficLoggerConfig {
        disable_prefix: true,
        ..TrafficLoggerConfig::default()
    };
    let server = test_server(&handler, config);

    server.get("/hello").await;

    let lines = handler.get_lines();
    assert_eq!(lines[0].marker, Some(Marker::Request));
    assert_eq!(lines[1].marker, Some(Marker::Response));
    assert!(lines.iter().all(|line| line.message.starts_with('{')));
}

#[tokio::test]
async fn test_disabled_handler_passes_through() {
    let handler = TestHandler::disabled();
    let server = test_server(&handler, TrafficLoggerConfig::default());

    let response = server.post("/echo").text("untouched").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "untouched");

    assert!(handler.get_lines().is_empty());
}

#[tokio::test]
async fn test_multiple_concurrent_requests() {
    let handler = TestHandler::new();
    let server = Arc::new(test_server(&handler, TrafficLoggerConfig::default()));

    // Send multiple concurrent requests using futures
    use futures::future::join_all;

    let futures: Vec<_> = (0..5)
        .map(|i| {
            let server = server.clone();
            async move { server.post("/echo").text(format!("Request {i}")).await }
        })
        .collect();

    let responses = join_all(futures).await;
    for (i, response) in responses.iter().enumerate() {
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.text(), format!("Request {i}"));
    }

    let lines = handler.get_lines();
    assert_eq!(lines.len(), 10);

    // Each exchange has its own correlation ID, shared by its request and response
    let mut correlation_ids = HashSet::new();
    for line in lines.iter().filter(|l| l.marker == Some(Marker::Request)) {
        assert!(correlation_ids.insert(line.correlation_id));
        let response = lines
            .iter()
            .find(|l| {
                l.marker == Some(Marker::Response) && l.correlation_id == line.correlation_id
            })
            .unwrap();
        assert_eq!(record(line)["body"], record(response)["body"]);
    }
    assert_eq!(correlation_ids.len(), 5);
}
