use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame};
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;

/// Wraps an upstream response body so each underlying read is forwarded
/// as its own `Frame` rather than being re-buffered into a single blob.
/// This is the Rust-idiomatic counterpart of the source's `ChunkWriter`
/// (`pkg/core/internal`, referenced from `bridge.go`): hyper's HTTP/1
/// writer emits one wire chunk per successful `poll_frame` when no
/// `Content-Length` is set, so passing frames through untouched is what
/// preserves chunk boundaries end to end.
pub struct ChunkedBody {
    inner: Incoming,
}

impl ChunkedBody {
    pub fn new(inner: Incoming) -> Self {
        Self { inner }
    }

    pub fn boxed(self) -> BoxBody<Bytes, hyper::Error> {
        BoxBody::new(self)
    }
}

impl Body for ChunkedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }
}

/// Whether the response used `Transfer-Encoding: chunked`, mirroring the
/// source's `resp.TransferEncoding[0] == "chunked"` check.
pub fn is_chunked(headers: &hyper::HeaderMap) -> bool {
    headers
        .get(hyper::header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
}
