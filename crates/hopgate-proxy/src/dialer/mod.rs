mod direct;
mod reject;
mod shadowsocks;

pub use direct::Direct;
pub use reject::Reject;
pub use shadowsocks::ShadowSocks;

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{ProxyError, Result};

/// Anything that can be read and written asynchronously — what `dial`
/// hands back to a caller, regardless of which transport produced it.
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

pub type BoxedStream = Pin<Box<dyn IoStream>>;

/// Capability set a Tunnel wraps: open a connection, report a descriptive
/// address, and release resources. Mirrors `pkg/core/dialer/dialer.go`'s
/// `Dialer` interface.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, network: &str, addr: &str) -> Result<BoxedStream>;

    /// A descriptive address for this dialer (e.g. the upstream proxy
    /// node). Direct reports `"0.0.0.0:0"`; Reject reports `""`.
    fn addr(&self) -> String;

    async fn close(&self) {}
}

type Factory = fn(&str) -> Result<Box<dyn Dialer>>;

/// A process-wide registry mapping proxy `type` tags to constructors,
/// mirroring `pkg/core/dialer/dialer.go`'s `dialers` map. Built fresh per
/// `Engine` rather than as a global singleton (spec.md's redesign note).
pub struct DialerRegistry {
    factories: HashMap<&'static str, Factory>,
}

impl Default for DialerRegistry {
    fn default() -> Self {
        let mut factories: HashMap<&'static str, Factory> = HashMap::new();
        factories.insert("direct", |url| Ok(Box::new(Direct::new_from_url(url)?)));
        factories.insert("reject", |_url| Ok(Box::new(Reject::new())));
        factories.insert("ss", |url| Ok(Box::new(ShadowSocks::new_from_url(url)?)));
        Self { factories }
    }
}

impl DialerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_dialer(&self, kind: &str, url: &str) -> Result<Box<dyn Dialer>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| ProxyError::UnrecognizedDialerType(kind.to_string()))?;
        factory(url)
    }
}
