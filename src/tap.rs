//! Response body tap.
//!
//! [`TappedBody`] wraps the body of a response that is already on its way to the client. Each
//! frame is handed on as soon as the inner body yields it, and the bytes of data frames are
//! written through the [`CapturingResponse`] byte sink on the way. The record is delivered once,
//! when the body ends, fails, or is dropped unfinished.

use axum::body::{Body, HttpBody};
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use std::{
    io::Write,
    pin::Pin,
    task::{Context, Poll},
};
use tracing::{debug, error};

use crate::{
    capture::CapturingResponse,
    response::{ResponseHead, WritableResponse},
    types::ResponseRecord,
};

type OnComplete = Box<dyn FnOnce(ResponseRecord) + Send>;

/// Body that forwards every frame of `inner` and records its data as it passes.
pub struct TappedBody {
    inner: Body,
    capture: CapturingResponse<ResponseHead>,
    on_complete: Option<OnComplete>,
}

impl TappedBody {
    pub(crate) fn new(
        inner: Body,
        capture: CapturingResponse<ResponseHead>,
        on_complete: impl FnOnce(ResponseRecord) + Send + 'static,
    ) -> Self {
        Self {
            inner,
            capture,
            on_complete: Some(Box::new(on_complete)),
        }
    }

    fn complete(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            debug!("Response body captured");
            on_complete(ResponseRecord::from_capture(&self.capture, true));
        }
    }
}

impl HttpBody for TappedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = futures::ready!(Pin::new(&mut this.inner).poll_frame(cx));
        match &polled {
            Some(Ok(frame)) => {
                if let Some(chunk) = frame.data_ref() {
                    if let Err(e) = this.capture.output_stream().write_all(chunk) {
                        error!(error = %e, "Failed to record response chunk");
                    }
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "Stream error during response body capture");
                this.complete();
            }
            None => this.complete(),
        }
        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for TappedBody {
    fn drop(&mut self) {
        if self.on_complete.is_some() {
            debug!("Response body dropped before it finished");
            self.complete();
        }
    }
}
