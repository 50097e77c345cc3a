use async_trait::async_trait;

use super::{BoxedStream, Dialer};
use crate::error::{ProxyError, Result};

/// Always fails. Used to implement policy drops. Mirrors
/// `pkg/core/dialer/reject/reject.go`.
#[derive(Default)]
pub struct Reject;

impl Reject {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for Reject {
    async fn dial(&self, _network: &str, _addr: &str) -> Result<BoxedStream> {
        Err(ProxyError::DialRejected)
    }

    fn addr(&self) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn always_rejects() {
        let dialer = Reject::new();
        let err = dialer.dial("tcp", "example.com:443").await.unwrap_err();
        assert!(matches!(err, ProxyError::DialRejected));
        assert_eq!(dialer.addr(), "");
    }
}
