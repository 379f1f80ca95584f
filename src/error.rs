//! Error type shared by the capture components.

use axum::http::header::{InvalidHeaderName, InvalidHeaderValue};

/// Error type for capture operations.
///
/// Capture itself never introduces a failure: every variant corresponds to something the real
/// request or response rejected, or to a problem preparing a log record.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] InvalidHeaderName),
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] InvalidHeaderValue),
    #[error("Timestamp {0} cannot be rendered as an HTTP date")]
    InvalidDate(i64),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Record serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
