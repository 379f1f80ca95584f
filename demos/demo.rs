use axum::{
    body::{Body, Bytes},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::{fmt::Write as _, io::Write as _, net::SocketAddr, time::Duration};
use tokio::{net::TcpListener, time::sleep};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trafficlog::{
    BufferedResponse, LoggingHandler, TrafficLoggerConfig, TrafficLoggerLayer, WritableResponse,
};

// Test handlers for our demo server
async fn hello_handler() -> impl IntoResponse {
    sleep(Duration::from_millis(100)).await; // Simulate some work
    "Hello, World!"
}

async fn echo_handler(body: Bytes) -> impl IntoResponse {
    format!("Echo: {}", String::from_utf8_lossy(&body))
}

/// Builds its response imperatively, mixing byte and text writes
async fn report_handler() -> Result<BufferedResponse, StatusCode> {
    let mut response = BufferedResponse::new();
    response
        .set_header("Content-Type", "text/plain; charset=ISO-8859-1")
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    response
        .set_int_header("X-Report-Version", 2)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    response
        .output_stream()
        .write_all(b"report: ")
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    write!(response.writer(), "café {}", 42).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(response)
}

async fn streaming_handler() -> impl IntoResponse {
    use futures::stream;

    let stream = stream::unfold(0u32, |count| async move {
        if count >= 5 {
            None
        } else {
            sleep(Duration::from_millis(200)).await;
            Some((
                Ok::<_, std::convert::Infallible>(Bytes::from(format!("chunk-{count}\n"))),
                count + 1,
            ))
        }
    });

    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::from_stream(stream))
        .unwrap()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Capture runs only while DEBUG is enabled for trafficlog
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,trafficlog=debug")),
        )
        .init();

    info!("Starting traffic logging demo server");

    let config = TrafficLoggerConfig {
        capture_request_body: true,
        capture_response_body: true,
        disable_prefix: false,
        disable_marker: false,
    };

    let app = Router::new()
        .route("/hello", get(hello_handler))
        .route("/echo", post(echo_handler))
        .route("/report", get(report_handler))
        .route("/streaming", get(streaming_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TrafficLoggerLayer::new(config, LoggingHandler))
                .into_inner(),
        );

    info!("Demo server endpoints:");
    info!("  GET  /hello      - Simple greeting");
    info!("  POST /echo       - Echo request body");
    info!("  GET  /report     - Latin-1 response written through the response API");
    info!("  GET  /streaming  - Streaming response");
    info!("");
    info!("Try these commands:");
    info!("  curl http://localhost:3000/hello");
    info!("  curl -X POST -d 'field1=1000&field2=2000' http://localhost:3000/echo");
    info!("  curl http://localhost:3000/report");
    info!("  curl http://localhost:3000/streaming");

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!("Demo server listening on http://localhost:3000");

    // Connect info lets request records carry the sender address
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
