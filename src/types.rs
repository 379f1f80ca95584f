//! Log records and log lines.
//!
//! This module contains the JSON records built from captured requests and responses, and the
//! [`LogLine`] handed to a [`crate::TrafficHandler`].

use axum::http::HeaderMap;
use serde::Serialize;
use std::{collections::BTreeMap, fmt};

use crate::{capture::CapturingResponse, request::RequestSnapshot, response::WritableResponse};

/// JSON record for a captured request.
///
/// ```json
/// {"sender":"127.0.0.1","method":"POST","path":"/test","headers":{"accept":"application/json"},"body":"field1=1000"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl From<&RequestSnapshot> for RequestRecord {
    fn from(snapshot: &RequestSnapshot) -> Self {
        Self {
            sender: snapshot.sender.map(|ip| ip.to_string()),
            method: snapshot.method.to_string(),
            path: snapshot.uri.to_string(),
            headers: convert_headers(&snapshot.headers),
            body: snapshot.body.clone(),
        }
    }
}

/// JSON record for a captured response.
///
/// `status` is `null` when the response never had a status set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseRecord {
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl ResponseRecord {
    /// Builds a record from a capture, with the decoded body when `include_body` is set.
    pub fn from_capture<R: WritableResponse>(
        capture: &CapturingResponse<R>,
        include_body: bool,
    ) -> Self {
        Self {
            status: capture.status().map(|status| status.as_u16()),
            headers: capture
                .headers()
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            body: include_body.then(|| capture.content()),
        }
    }
}

/// Flattens a header map to one string per name, joining repeated values with `", "`.
fn convert_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    for name in headers.keys() {
        let value = headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()))
            .collect::<Vec<_>>()
            .join(", ");
        result.insert(name.as_str().to_owned(), value);
    }
    result
}

/// Which side of the exchange a log line describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    Request,
    Response,
}

impl Marker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Marker::Request => "REQUEST",
            Marker::Response => "RESPONSE",
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A formatted record ready to be emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Identifier shared by the request and response lines of one exchange
    pub correlation_id: u64,
    /// Marker to tag the line with, unless markers are disabled
    pub marker: Option<Marker>,
    /// The JSON record, prefixed with `"REQUEST: "` or `"RESPONSE: "` unless prefixes are disabled
    pub message: String,
}

impl LogLine {
    /// Serializes `record` and applies the marker and prefix settings.
    pub fn new<T: Serialize>(
        correlation_id: u64,
        marker: Marker,
        record: &T,
        with_marker: bool,
        with_prefix: bool,
    ) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(record)?;
        let message = if with_prefix {
            format!("{marker}: {json}")
        } else {
            json
        };
        Ok(Self {
            correlation_id,
            marker: with_marker.then_some(marker),
            message,
        })
    }
}
