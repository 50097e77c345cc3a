use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use crate::dialer::BoxedStream;

/// Wraps a dialed stream so every successful read/write forwards its byte
/// count into bounded channels. Mirrors `pkg/core/traffic.go`'s
/// `ConnTrafficTracker`. Sends are best-effort: if the channel is full the
/// count is dropped rather than applying backpressure to the flow — these
/// are metrics, not an audit trail.
pub struct AccountedStream {
    inner: BoxedStream,
    down_tx: mpsc::Sender<usize>,
    up_tx: mpsc::Sender<usize>,
}

impl AccountedStream {
    pub fn new(inner: BoxedStream, down_tx: mpsc::Sender<usize>, up_tx: mpsc::Sender<usize>) -> Self {
        Self {
            inner,
            down_tx,
            up_tx,
        }
    }
}

impl AsyncRead for AccountedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let res = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &res {
            let n = buf.filled().len() - before;
            if n > 0 {
                let _ = self.down_tx.try_send(n);
            }
        }
        res
    }
}

impl AsyncWrite for AccountedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let res = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &res {
            if *n > 0 {
                let _ = self.up_tx.try_send(*n);
            }
        }
        res
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
