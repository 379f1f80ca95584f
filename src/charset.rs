//! Character encoding resolution for captured bodies.
//!
//! Captured bodies are always kept as raw bytes. Text is only produced when a record is built,
//! using the encoding the message declares (UTF-8 when it declares none). A declared encoding that
//! `encoding_rs` does not know never fails the caller: decoding yields [`UNSUPPORTED_ENCODING`]
//! instead.

use axum::http::{header::CONTENT_TYPE, HeaderMap};
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use std::borrow::Cow;
use tracing::debug;

/// Placeholder text returned when a body cannot be decoded with its declared encoding.
pub const UNSUPPORTED_ENCODING: &str = "[UNSUPPORTED ENCODING]";

/// Resolves a declared encoding label.
///
/// No label means UTF-8. A label `encoding_rs` does not recognize resolves to `None`.
pub fn resolve(label: Option<&str>) -> Option<&'static Encoding> {
    match label {
        None => Some(UTF_8),
        Some(label) => Encoding::for_label(label.trim().as_bytes()),
    }
}

/// Decodes `bytes` with the encoding named by `label`.
///
/// Malformed sequences are replaced with U+FFFD. An unknown label yields [`UNSUPPORTED_ENCODING`].
pub fn decode(bytes: &[u8], label: Option<&str>) -> String {
    match resolve(label) {
        Some(encoding) => {
            let (text, _had_errors) = encoding.decode_without_bom_handling(bytes);
            text.into_owned()
        }
        None => {
            debug!(label = label.unwrap_or_default(), "Unsupported body encoding");
            UNSUPPORTED_ENCODING.to_string()
        }
    }
}

/// Encodes `text` into `encoding`.
///
/// `encoding_rs` only encodes UTF-16 as UTF-8, so both UTF-16 variants are handled here. No BOM
/// is written, and the bare `utf-16` label resolves to little-endian, so a peer expecting a BOM
/// followed by big-endian units will not read it back.
pub fn encode<'a>(text: &'a str, encoding: &'static Encoding) -> Cow<'a, [u8]> {
    if encoding == UTF_16LE {
        Cow::Owned(text.encode_utf16().flat_map(u16::to_le_bytes).collect())
    } else if encoding == UTF_16BE {
        Cow::Owned(text.encode_utf16().flat_map(u16::to_be_bytes).collect())
    } else {
        let (bytes, _encoding, _unmappable) = encoding.encode(text);
        bytes
    }
}

/// Returns the `charset` parameter of the `Content-Type` header, if any.
pub fn charset_from_headers(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let media_type: mime::Mime = content_type.parse().ok()?;
    media_type
        .get_param(mime::CHARSET)
        .map(|charset| charset.as_str().to_string())
}
