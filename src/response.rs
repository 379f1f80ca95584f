//! The response contract that capture decorates, and its concrete axum-backed implementation.
//!
//! [`WritableResponse`] is an imperative view of an HTTP response: headers and status are set by
//! name, and the body is written through an [`std::io::Write`] sink or a text [`TextWriter`].
//! [`BufferedResponse`] implements it over an in-memory body and converts into an
//! [`axum::response::Response`], so handlers can build responses this way and return them
//! directly.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use http_body::Frame;
use http_body_util::StreamBody;
use std::{convert::Infallible, fmt, io};

use crate::{charset, error::CaptureError};

/// Mutable response surface: headers, status, and a byte-oriented body sink.
///
/// Header values set through the typed helpers are rendered by the implementation. The default
/// rendering of a date header is an IMF-fixdate in GMT, and an integer header is its decimal form.
pub trait WritableResponse {
    /// Byte sink returned by [`WritableResponse::output_stream`].
    type OutputStream<'a>: io::Write
    where
        Self: 'a;

    /// Replaces every value of `name` with `value`.
    fn set_header(&mut self, name: &str, value: &str) -> Result<(), CaptureError>;

    /// Appends `value` to the values of `name`.
    fn add_header(&mut self, name: &str, value: &str) -> Result<(), CaptureError>;

    /// Replaces `name` with the HTTP date for `millis` since the Unix epoch.
    fn set_date_header(&mut self, name: &str, millis: i64) -> Result<(), CaptureError> {
        self.set_header(name, &http_date(millis)?)
    }

    /// Appends the HTTP date for `millis` since the Unix epoch to `name`.
    fn add_date_header(&mut self, name: &str, millis: i64) -> Result<(), CaptureError> {
        self.add_header(name, &http_date(millis)?)
    }

    fn set_int_header(&mut self, name: &str, value: i32) -> Result<(), CaptureError> {
        self.set_header(name, &value.to_string())
    }

    fn add_int_header(&mut self, name: &str, value: i32) -> Result<(), CaptureError> {
        self.add_header(name, &value.to_string())
    }

    fn set_status(&mut self, status: StatusCode);

    /// Sets the status along with a reason phrase.
    fn set_status_with_message(&mut self, status: StatusCode, message: &str);

    /// The declared character encoding label of the body, if any.
    fn character_encoding(&self) -> Option<String>;

    /// Byte sink for the response body.
    fn output_stream(&mut self) -> Self::OutputStream<'_>;

    /// Text sink for the response body, writing through [`WritableResponse::output_stream`].
    ///
    /// Text is encoded with the declared character encoding, or UTF-8 when none is declared or
    /// the declared one is unknown.
    fn writer(&mut self) -> TextWriter<Self::OutputStream<'_>> {
        let encoding =
            charset::resolve(self.character_encoding().as_deref()).unwrap_or(UTF_8);
        TextWriter::new(self.output_stream(), encoding)
    }
}

/// Formats milliseconds since the Unix epoch as an HTTP date.
pub fn http_date(millis: i64) -> Result<String, CaptureError> {
    let date =
        chrono::DateTime::from_timestamp_millis(millis).ok_or(CaptureError::InvalidDate(millis))?;
    Ok(date.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

/// Text view over a byte sink.
///
/// Implements [`fmt::Write`] so `write!` works. Because `fmt::Error` carries no detail, the last
/// I/O error is kept and can be inspected with [`TextWriter::take_error`]; use
/// [`TextWriter::print`] to get it directly.
pub struct TextWriter<W> {
    sink: W,
    encoding: &'static Encoding,
    error: Option<io::Error>,
}

impl<W: io::Write> TextWriter<W> {
    pub fn new(sink: W, encoding: &'static Encoding) -> Self {
        Self {
            sink,
            encoding,
            error: None,
        }
    }

    /// The encoding text is written in.
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Encodes `text` and writes all of it to the sink.
    pub fn print(&mut self, text: &str) -> io::Result<()> {
        self.sink.write_all(&charset::encode(text, self.encoding))
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }

    /// Takes the error that made the last `fmt::Write` call fail, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: io::Write> fmt::Write for TextWriter<W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.print(s).map_err(|e| {
            self.error = Some(e);
            fmt::Error
        })
    }
}

/// A response whose body is buffered in memory until it is converted into an axum [`Response`].
///
/// Defaults to `200 OK`, no headers and an empty body.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    status: StatusCode,
    status_message: Option<String>,
    headers: HeaderMap,
    character_encoding: Option<String>,
    body: Vec<u8>,
    trailers: Option<HeaderMap>,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase given to [`WritableResponse::set_status_with_message`].
    ///
    /// Kept for inspection only; axum responses always use the canonical reason.
    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Overrides the encoding declared by the `Content-Type` charset.
    pub fn set_character_encoding(&mut self, label: impl Into<String>) {
        self.character_encoding = Some(label.into());
    }

    pub fn set_trailers(&mut self, trailers: HeaderMap) {
        self.trailers = Some(trailers);
    }
}

impl WritableResponse for BufferedResponse {
    type OutputStream<'a> = &'a mut Vec<u8>;

    fn set_header(&mut self, name: &str, value: &str) -> Result<(), CaptureError> {
        let (name, value) = header_pair(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    fn add_header(&mut self, name: &str, value: &str) -> Result<(), CaptureError> {
        let (name, value) = header_pair(name, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn set_status_with_message(&mut self, status: StatusCode, message: &str) {
        self.status = status;
        self.status_message = Some(message.to_string());
    }

    fn character_encoding(&self) -> Option<String> {
        self.character_encoding
            .clone()
            .or_else(|| charset::charset_from_headers(&self.headers))
    }

    fn output_stream(&mut self) -> Self::OutputStream<'_> {
        &mut self.body
    }
}

impl IntoResponse for BufferedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(body_with_trailers(Bytes::from(self.body), self.trailers));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Mirror of a response head whose body is delivered separately.
///
/// Status and headers behave as on [`BufferedResponse`]. Its byte sink discards everything, so
/// replaying an already-built response through a [`crate::CapturingResponse`] records the body
/// without keeping a second copy of it.
#[derive(Debug, Default)]
pub struct ResponseHead {
    status: StatusCode,
    headers: HeaderMap,
}

impl ResponseHead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}

impl WritableResponse for ResponseHead {
    type OutputStream<'a> = io::Sink;

    fn set_header(&mut self, name: &str, value: &str) -> Result<(), CaptureError> {
        let (name, value) = header_pair(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    fn add_header(&mut self, name: &str, value: &str) -> Result<(), CaptureError> {
        let (name, value) = header_pair(name, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn set_status_with_message(&mut self, status: StatusCode, _message: &str) {
        self.status = status;
    }

    fn character_encoding(&self) -> Option<String> {
        charset::charset_from_headers(&self.headers)
    }

    fn output_stream(&mut self) -> Self::OutputStream<'_> {
        io::sink()
    }
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), CaptureError> {
    Ok((
        HeaderName::from_bytes(name.as_bytes())?,
        HeaderValue::from_str(value)?,
    ))
}

/// Builds a body that yields `data` and then `trailers`, if there are any.
pub(crate) fn body_with_trailers(data: Bytes, trailers: Option<HeaderMap>) -> Body {
    match trailers {
        None => Body::from(data),
        Some(trailers) => {
            let frames = [
                Ok::<_, Infallible>(Frame::data(data)),
                Ok(Frame::trailers(trailers)),
            ];
            Body::new(StreamBody::new(futures::stream::iter(frames)))
        }
    }
}
