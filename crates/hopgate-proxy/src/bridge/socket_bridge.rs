use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

use super::{AtomicStatus, Status};
use crate::error::Result;
use crate::tunnel::Tunnel;

/// Opaque TCP relay used for SOCKS5 and for CONNECT tunneling. Mirrors
/// `pkg/core/bridge.go`'s `SocketBridge`.
pub struct SocketBridge {
    status: AtomicStatus,
}

impl Default for SocketBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketBridge {
    pub fn new() -> Self {
        Self {
            status: AtomicStatus::default(),
        }
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    /// Dials `forward or dst_addr` via `tunnel`, then relays bytes
    /// bidirectionally between `client` and the dialed server stream
    /// until both directions finish.
    pub async fn transport<C>(
        &self,
        client: C,
        dst_addr: &str,
        forward: Option<&str>,
        tunnel: Arc<Tunnel>,
    ) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.status.set(Status::Connecting);

        let target = forward.unwrap_or(dst_addr);
        let server = match tunnel.dial("tcp", target).await {
            Ok(s) => s,
            Err(e) => {
                self.status.set(Status::Failed);
                warn!(dst = %dst_addr, error = %e, "socket bridge dial failed");
                return Err(e);
            }
        };

        self.status.set(Status::Transporting);

        let (mut client_rd, mut client_wr) = tokio::io::split(client);
        let (mut server_rd, mut server_wr) = tokio::io::split(server);

        let client_to_server = async move {
            let res = tokio::io::copy(&mut client_rd, &mut server_wr).await;
            let _ = server_wr.shutdown().await;
            res
        };
        let server_to_client = async move {
            let res = tokio::io::copy(&mut server_rd, &mut client_wr).await;
            let _ = client_wr.shutdown().await;
            res
        };

        let (up, down) = tokio::join!(client_to_server, server_to_client);
        if let Err(e) = up {
            warn!(dst = %dst_addr, error = %e, "client to server copy ended with error");
        }
        if let Err(e) = down {
            warn!(dst = %dst_addr, error = %e, "server to client copy ended with error");
        }

        self.status.set(Status::Disconnected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialer::Direct;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};

    #[tokio::test]
    async fn relays_bytes_in_both_directions() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let tunnel = Tunnel::new("a", Box::new(Direct::new(Duration::from_secs(1))), None, Duration::from_secs(1));
        let bridge = SocketBridge::new();

        let (mut local, remote) = tokio::io::duplex(64);
        local.write_all(b"hello").await.unwrap();

        let addr_str = addr.to_string();
        let handle = tokio::spawn(async move {
            bridge.transport(remote, &addr_str, None, tunnel.clone()).await.unwrap();
            tunnel.close().await;
        });

        let mut echoed = [0u8; 5];
        local.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn dial_failure_sets_failed_status() {
        // Port 0 after binding-and-dropping a listener is unlikely to be
        // reused immediately, so dial it directly to force a connection
        // refusal deterministically via the reject dialer instead.
        let tunnel = Tunnel::new(
            "r",
            Box::new(crate::dialer::Reject::new()),
            None,
            Duration::from_secs(1),
        );
        let bridge = SocketBridge::new();
        let (_local, remote): (TcpStream, TcpStream) = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
            let client = TcpStream::connect(addr).await.unwrap();
            (client, accept.await.unwrap())
        };
        let result = bridge.transport(remote, "example.com:443", None, tunnel.clone()).await;
        assert!(result.is_err());
        assert_eq!(bridge.status(), Status::Failed);
        tunnel.close().await;
    }
}
