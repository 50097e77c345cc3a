use std::net::SocketAddr;

use async_trait::async_trait;
use shadowsocks::config::{ServerAddr, ServerConfig};
use shadowsocks::context::{Context, SharedContext};
use shadowsocks::crypto::CipherKind;
use shadowsocks::relay::socks5::Address;
use shadowsocks::relay::tcprelay::proxy_stream::client::ProxyClientStream;
use shadowsocks::ServerType;
use socket2::SockRef;
use tokio::net::TcpStream;

use super::{BoxedStream, Dialer};
use crate::error::{ProxyError, Result};

/// Dials a configured Shadowsocks server node, wraps the socket in the
/// cipher stream, and writes the SOCKS-style target address prefix.
/// Mirrors `pkg/core/dialer/shadowsocks/ss.go`.
pub struct ShadowSocks {
    context: SharedContext,
    svr_cfg: ServerConfig,
}

impl ShadowSocks {
    pub fn new(svr_cfg: ServerConfig) -> Self {
        Self {
            context: Context::new_shared(ServerType::Local),
            svr_cfg,
        }
    }

    pub(super) fn new_from_url(url: &str) -> Result<Self> {
        let svr_cfg = parse_ss_url(url)?;
        Ok(Self::new(svr_cfg))
    }
}

#[async_trait]
impl Dialer for ShadowSocks {
    async fn dial(&self, network: &str, addr: &str) -> Result<BoxedStream> {
        if network != "tcp" {
            return Err(ProxyError::ProtocolNotSupported(network.to_string()));
        }
        let target = parse_target_address(addr)
            .ok_or_else(|| ProxyError::InvalidAddress(addr.to_string()))?;

        let server_addr = self.svr_cfg.addr().to_string();
        let stream = TcpStream::connect(&server_addr).await?;
        let _ = SockRef::from(&stream).set_keepalive(true);

        let proxied =
            ProxyClientStream::from_stream(self.context.clone(), stream, &self.svr_cfg, target);
        Ok(Box::pin(proxied))
    }

    fn addr(&self) -> String {
        self.svr_cfg.addr().to_string()
    }
}

/// `addr` is a resolved `host:port` pair; the SOCKS address is a socket
/// address when the host is a literal IP, or a domain name otherwise.
fn parse_target_address(addr: &str) -> Option<Address> {
    let (host, port) = hopgate_core::addr::split_host_port(addr)?;
    if let Ok(sock) = format!("{host}:{port}").parse::<SocketAddr>() {
        Some(Address::SocketAddress(sock))
    } else {
        Some(Address::DomainNameAddress(host, port))
    }
}

/// Parses `ss://method:password@host:port`. This is a plain, unencoded
/// variant rather than full SIP002 base64 userinfo — documented as a
/// deliberate simplification in DESIGN.md.
fn parse_ss_url(url: &str) -> Result<ServerConfig> {
    let rest = url
        .strip_prefix("ss://")
        .ok_or_else(|| ProxyError::InvalidAddress(url.to_string()))?;
    let (userinfo, hostport) = rest
        .split_once('@')
        .ok_or_else(|| ProxyError::InvalidAddress(url.to_string()))?;
    let (method, password) = userinfo
        .split_once(':')
        .ok_or_else(|| ProxyError::InvalidAddress(url.to_string()))?;
    let (host, port) =
        hopgate_core::addr::split_host_port(hostport).ok_or(ProxyError::InvalidAddress(url.to_string()))?;

    let method: CipherKind = method
        .parse()
        .map_err(|_| ProxyError::Other(format!("unknown cipher '{method}'")))?;

    let server_addr = if let Ok(sock) = format!("{host}:{port}").parse::<SocketAddr>() {
        ServerAddr::SocketAddr(sock)
    } else {
        ServerAddr::DomainName(host, port)
    };

    Ok(ServerConfig::new(server_addr, password.to_string(), method))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_ss_url() {
        let cfg = parse_ss_url("ss://aes-256-gcm:hunter2@proxy.example.com:8388").unwrap();
        assert_eq!(cfg.addr().to_string(), "proxy.example.com:8388");
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(parse_ss_url("aes-256-gcm:hunter2@proxy.example.com:8388").is_err());
    }

    #[test]
    fn target_address_picks_domain_or_socket() {
        match parse_target_address("example.com:443").unwrap() {
            Address::DomainNameAddress(h, p) => {
                assert_eq!(h, "example.com");
                assert_eq!(p, 443);
            }
            _ => panic!("expected domain address"),
        }
        match parse_target_address("1.2.3.4:443").unwrap() {
            Address::SocketAddress(_) => {}
            _ => panic!("expected socket address"),
        }
    }
}
