//! Response capture.
//!
//! [`CapturingResponse`] decorates any [`WritableResponse`]. Every call is forwarded to the wrapped
//! response unchanged, and what it changed is recorded: the last value set for each header name,
//! the last status, and every body byte the wrapped response accepted. Byte and text writes go
//! through the same [`CaptureStream`], so a handler may mix both and the capture still holds the
//! body exactly once, in write order.

use axum::http::StatusCode;
use bytes::Bytes;
use std::{collections::HashMap, io};

use crate::{charset, error::CaptureError, response::WritableResponse};

/// Records headers, status and body written to the wrapped response.
///
/// Header names are recorded as written. When a name is added several times the wrapped response
/// keeps every value while the capture only keeps the latest one.
#[derive(Debug)]
pub struct CapturingResponse<R> {
    inner: R,
    headers: HashMap<String, String>,
    status: Option<StatusCode>,
    body: Vec<u8>,
}

impl<R: WritableResponse> CapturingResponse<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            headers: HashMap::new(),
            status: None,
            body: Vec::new(),
        }
    }

    /// Captured headers, name to last value.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Last status set, or `None` if no status call was made.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Captured body decoded with the wrapped response's declared encoding.
    ///
    /// Returns [`charset::UNSUPPORTED_ENCODING`] when that encoding is unknown.
    pub fn content(&self) -> String {
        charset::decode(&self.body, self.inner.character_encoding().as_deref())
    }

    /// Copy of the captured body bytes.
    pub fn content_as_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.body)
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Mutable access to the wrapped response. Changes made through it are not captured.
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub(crate) fn record_header(&mut self, name: &str, value: String) {
        self.headers.insert(name.to_string(), value);
    }
}

impl<R: WritableResponse> WritableResponse for CapturingResponse<R> {
    type OutputStream<'a>
        = CaptureStream<'a, R>
    where
        Self: 'a;

    fn set_header(&mut self, name: &str, value: &str) -> Result<(), CaptureError> {
        self.inner.set_header(name, value)?;
        self.record_header(name, value.to_string());
        Ok(())
    }

    fn add_header(&mut self, name: &str, value: &str) -> Result<(), CaptureError> {
        self.inner.add_header(name, value)?;
        self.record_header(name, value.to_string());
        Ok(())
    }

    fn set_date_header(&mut self, name: &str, millis: i64) -> Result<(), CaptureError> {
        self.inner.set_date_header(name, millis)?;
        self.record_header(name, millis.to_string());
        Ok(())
    }

    fn add_date_header(&mut self, name: &str, millis: i64) -> Result<(), CaptureError> {
        self.inner.add_date_header(name, millis)?;
        self.record_header(name, millis.to_string());
        Ok(())
    }

    fn set_int_header(&mut self, name: &str, value: i32) -> Result<(), CaptureError> {
        self.inner.set_int_header(name, value)?;
        self.record_header(name, value.to_string());
        Ok(())
    }

    fn add_int_header(&mut self, name: &str, value: i32) -> Result<(), CaptureError> {
        self.inner.add_int_header(name, value)?;
        self.record_header(name, value.to_string());
        Ok(())
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
        self.inner.set_status(status);
    }

    fn set_status_with_message(&mut self, status: StatusCode, message: &str) {
        self.status = Some(status);
        self.inner.set_status_with_message(status, message);
    }

    fn character_encoding(&self) -> Option<String> {
        self.inner.character_encoding()
    }

    fn output_stream(&mut self) -> Self::OutputStream<'_> {
        CaptureStream {
            captured: &mut self.body,
            inner: self.inner.output_stream(),
        }
    }
}

/// Byte sink that forwards to the wrapped response's stream and records what it accepted.
pub struct CaptureStream<'a, R: WritableResponse + 'a> {
    captured: &'a mut Vec<u8>,
    inner: R::OutputStream<'a>,
}

impl<'a, R: WritableResponse + 'a> CaptureStream<'a, R> {
    /// Writes a single byte.
    pub fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        io::Write::write_all(self, &[byte])
    }
}

impl<'a, R: WritableResponse + 'a> io::Write for CaptureStream<'a, R> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.captured.extend_from_slice(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
