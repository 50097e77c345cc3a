use std::future::Future;
use std::io::IoSlice;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use hyper::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tower::Service;

use crate::dialer::{BoxedStream, Dialer};
use crate::error::ProxyError;

/// Wraps a `BoxedStream` so it can satisfy `hyper_util`'s `Connection`
/// bound — the boxed trait object carries no transport-specific metadata
/// (ALPN, ...), so `connected()` reports a plain, unnegotiated connection,
/// the same fallback `RustlsStream::connected()` takes in the non-h2 case.
struct TunnelStream(BoxedStream);

impl Connection for TunnelStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_read(cx, buf)
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().0).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().0).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().0).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.0.is_write_vectored()
    }
}

/// A `tower::Service<Uri>` whose `call` dials through a `Dialer` instead of
/// opening a direct socket — the Rust analogue of the source's
/// `http.Transport{Dial: func(...) {...}}` pattern used by both the
/// latency probe and `HttpBridge`.
#[derive(Clone)]
pub struct TunnelConnector {
    dialer: Arc<dyn Dialer>,
    /// When set, every request is dialed to this address regardless of
    /// the request URI's authority (used by `HttpBridge`, whose dial
    /// target is the resolved `forward`/`dst_addr`, not necessarily what
    /// the client's request line says).
    fixed_addr: Option<String>,
}

impl TunnelConnector {
    pub fn new(dialer: Arc<dyn Dialer>) -> Self {
        Self {
            dialer,
            fixed_addr: None,
        }
    }

    pub fn with_fixed_addr(dialer: Arc<dyn Dialer>, addr: String) -> Self {
        Self {
            dialer,
            fixed_addr: Some(addr),
        }
    }
}

impl Service<Uri> for TunnelConnector {
    type Response = TokioIo<TunnelStream>;
    type Error = ProxyError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let dialer = self.dialer.clone();
        let addr = self.fixed_addr.clone();
        Box::pin(async move {
            let addr = match addr {
                Some(a) => a,
                None => {
                    let host = uri
                        .host()
                        .ok_or_else(|| ProxyError::InvalidAddress(uri.to_string()))?;
                    let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
                        Some("https") => 443,
                        _ => 80,
                    });
                    format!("{host}:{port}")
                }
            };
            let stream = dialer.dial("tcp", &addr).await?;
            Ok(TokioIo::new(TunnelStream(stream)))
        })
    }
}
