use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use hopgate_proxy::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_NONE_ACCEPTABLE: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REP_SUCCESS: u8 = 0x00;
const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;

/// Minimal RFC 1928 SOCKS5 server: no-auth negotiation and the `CONNECT`
/// command only, mirroring `pkg/port/socks5/server.go` without the
/// source's username/password and UDP ASSOCIATE branches (spec.md §5
/// scopes those out).
pub async fn serve(
    engine: Arc<Engine>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "socks5 inbound listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "socks5 accept failed");
                        continue;
                    }
                };
                let engine = engine.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_conn(engine, stream).await {
                        warn!(%peer, error = %e, "socks5 connection ended with error");
                    }
                });
            }
        }
    }
    Ok(())
}

async fn handle_conn<S>(engine: Arc<Engine>, mut stream: S) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    negotiate_methods(&mut stream).await?;

    let Some(dst_addr) = read_connect_request(&mut stream).await? else {
        write_reply(&mut stream, REP_COMMAND_NOT_SUPPORTED).await?;
        return Ok(());
    };

    write_reply(&mut stream, REP_SUCCESS).await?;

    if let Err(e) = engine.serve_socket(stream, &dst_addr).await {
        warn!(dst = %dst_addr, error = %e, "socks5 tunnel failed");
    }
    Ok(())
}

/// Reads the greeting (`VER NMETHODS METHODS...`) and replies with
/// `NO_AUTH` if offered, else `NO_ACCEPTABLE_METHODS`.
async fn negotiate_methods<S>(stream: &mut S) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    let nmethods = header[1] as usize;

    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods).await?;

    if methods.contains(&METHOD_NO_AUTH) {
        stream.write_all(&[VERSION, METHOD_NO_AUTH]).await?;
        Ok(())
    } else {
        stream.write_all(&[VERSION, METHOD_NONE_ACCEPTABLE]).await?;
        Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "client offered no acceptable auth method",
        ))
    }
}

/// Reads `VER CMD RSV ATYP DST.ADDR DST.PORT` and returns `host:port`,
/// or `None` if `CMD` is not `CONNECT`.
async fn read_connect_request<S>(stream: &mut S) -> std::io::Result<Option<String>>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let cmd = header[1];
    let atyp = header[3];

    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Ipv4Addr::from(octets).to_string()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            Ipv6Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let mut len_buf = [0u8; 1];
            stream.read_exact(&mut len_buf).await?;
            let mut name = vec![0u8; len_buf[0] as usize];
            stream.read_exact(&mut name).await?;
            String::from_utf8(name)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?
        }
        other => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported address type {other}"),
            ))
        }
    };

    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await?;
    let port = u16::from_be_bytes(port_buf);

    if cmd != CMD_CONNECT {
        return Ok(None);
    }
    Ok(Some(format!("{host}:{port}")))
}

/// Writes a reply with a bound address of `0.0.0.0:0` — this server
/// never actually binds a relay socket for the client to learn, which
/// matches every minimal SOCKS5 implementation's reply contents.
async fn write_reply<S>(stream: &mut S, rep: u8) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let reply = [VERSION, rep, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0];
    stream.write_all(&reply).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn negotiates_no_auth_when_offered() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[VERSION, 1, METHOD_NO_AUTH]).await.unwrap();
        negotiate_methods(&mut server).await.unwrap();
        let mut resp = [0u8; 2];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp, [VERSION, METHOD_NO_AUTH]);
    }

    #[tokio::test]
    async fn rejects_when_no_auth_not_offered() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[VERSION, 1, 0x02]).await.unwrap();
        let result = negotiate_methods(&mut server).await;
        assert!(result.is_err());
        let mut resp = [0u8; 2];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp, [VERSION, METHOD_NONE_ACCEPTABLE]);
    }

    #[tokio::test]
    async fn parses_ipv4_connect_request() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&[VERSION, CMD_CONNECT, 0x00, ATYP_IPV4, 93, 184, 216, 34, 0x01, 0xbb])
            .await
            .unwrap();
        let dst = read_connect_request(&mut server).await.unwrap();
        assert_eq!(dst, Some("93.184.216.34:443".to_string()));
    }

    #[tokio::test]
    async fn parses_domain_connect_request() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let domain = b"example.com";
        let mut req = vec![VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, domain.len() as u8];
        req.extend_from_slice(domain);
        req.extend_from_slice(&80u16.to_be_bytes());
        client.write_all(&req).await.unwrap();
        let dst = read_connect_request(&mut server).await.unwrap();
        assert_eq!(dst, Some("example.com:80".to_string()));
    }

    #[tokio::test]
    async fn rejects_non_connect_command() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_all(&[VERSION, 0x03, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();
        let dst = read_connect_request(&mut server).await.unwrap();
        assert_eq!(dst, None);
    }
}
