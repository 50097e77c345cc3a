use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{BoxedStream, Dialer};
use crate::error::{ProxyError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens a plain TCP connection. Mirrors
/// `pkg/core/dialer/direct/direct.go`.
pub struct Direct {
    timeout: Duration,
}

impl Direct {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub(super) fn new_from_url(_url: &str) -> Result<Self> {
        Ok(Self::new(DEFAULT_TIMEOUT))
    }
}

#[async_trait]
impl Dialer for Direct {
    async fn dial(&self, network: &str, addr: &str) -> Result<BoxedStream> {
        if network != "tcp" {
            return Err(ProxyError::ProtocolNotSupported(network.to_string()));
        }
        let stream = timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProxyError::Other(format!("dial {addr} timed out")))??;
        Ok(Box::pin(stream))
    }

    fn addr(&self) -> String {
        "0.0.0.0:0".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn dials_a_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let dialer = Direct::new(Duration::from_secs(1));
        let stream = dialer.dial("tcp", &addr.to_string()).await;
        assert!(stream.is_ok());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_non_tcp_network() {
        let dialer = Direct::new(Duration::from_secs(1));
        let err = dialer.dial("udp", "127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, ProxyError::ProtocolNotSupported(_)));
    }
}
