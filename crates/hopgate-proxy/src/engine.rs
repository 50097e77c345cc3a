use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use hopgate_core::Config;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use rand::distr::Alphanumeric;
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use crate::bridge::{HttpBridge, SocketBridge, Status};
use crate::dialer::DialerRegistry;
use crate::error::{ProxyError, Result};
use crate::rules::Rules;
use crate::selector::{Selector, TunnelMap, DIRECT_TUNNEL_ID, REJECT_TUNNEL_ID};
use crate::tunnel::Tunnel;

fn random_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub enum BridgeHandle {
    Http(Arc<HttpBridge>),
    Socket(Arc<SocketBridge>),
}

impl BridgeHandle {
    pub fn status(&self) -> Status {
        match self {
            BridgeHandle::Http(b) => b.status(),
            BridgeHandle::Socket(b) => b.status(),
        }
    }
}

pub struct BridgeEntry {
    pub dst_addr: String,
    pub handle: BridgeHandle,
}

/// Registry of tunnels and live bridges; entry points `serve_http` and
/// `serve_socket`; wires Selector → Bridge. Mirrors `pkg/core/engine.go`
/// (the source's `ServeHTTP`/`ServeSocket`), built against the real
/// `selector.go`/`rules.go` logic rather than the source's own
/// incomplete `Engine.Select`.
pub struct Engine {
    tunnels: TunnelMap,
    bridges: DashMap<String, BridgeEntry>,
    selector: Selector,
}

impl Engine {
    /// Builds reserved `DIRECT`/`REJECT` tunnels, then a tunnel per
    /// `config.proxies` entry via the dialer registry, then an indexed
    /// `Rules` from `rules_config`.
    pub async fn new(config: &Config, rules: Rules) -> Result<Arc<Self>> {
        let tunnels: TunnelMap = DashMap::new();

        let direct = Tunnel::new(
            DIRECT_TUNNEL_ID,
            Box::new(crate::dialer::Direct::new(Duration::from_secs(10))),
            None,
            Duration::from_millis(0),
        );
        tunnels.insert(DIRECT_TUNNEL_ID.to_string(), direct);

        let reject = Tunnel::new(
            REJECT_TUNNEL_ID,
            Box::new(crate::dialer::Reject::new()),
            None,
            Duration::from_millis(0),
        );
        tunnels.insert(REJECT_TUNNEL_ID.to_string(), reject);

        let registry = DialerRegistry::new();
        let probe_timeout = Duration::from_millis(config.latency.timeout_ms);

        for proxy in &config.proxies {
            let dialer = registry.new_dialer(&proxy.kind, &proxy.url)?;
            let probe_url = if proxy.kind == "direct" || proxy.kind == "reject" {
                None
            } else {
                Some(config.latency.url.clone())
            };
            let tunnel = Tunnel::new(proxy.name.clone(), dialer, probe_url, probe_timeout);
            for label in &proxy.labels {
                tunnel.label(label.clone()).await;
            }
            tunnels.insert(proxy.name.clone(), tunnel);
        }

        let selector = Selector::new(rules, config.global.clone());

        Ok(Arc::new(Self {
            tunnels,
            bridges: DashMap::new(),
            selector,
        }))
    }

    pub fn get_tunnel(&self, id: &str) -> Option<Arc<Tunnel>> {
        self.tunnels.get(id).map(|e| e.clone())
    }

    pub fn range_tunnels(&self, mut f: impl FnMut(&str, &Arc<Tunnel>)) {
        for entry in self.tunnels.iter() {
            f(entry.key(), entry.value());
        }
    }

    pub fn range_bridges(&self, mut f: impl FnMut(&str, &BridgeEntry)) {
        for entry in self.bridges.iter() {
            f(entry.key(), entry.value());
        }
    }

    /// Derives `dst = r.host` (appending `:80` if no port), resolves a
    /// tunnel via the selector, and runs an `HttpBridge`. Returns `None`
    /// when no rule matched (log-and-drop — the caller should close the
    /// connection without a response) or when the resolved tunnel is the
    /// reserved REJECT tunnel (transport denied, fail fast).
    pub async fn serve_http(
        self: &Arc<Self>,
        request: Request<Incoming>,
    ) -> Option<Result<Response<BoxBody<Bytes, hyper::Error>>>> {
        let dst = host_with_default_port(&request)?;

        let (tunnel, forward) = match self.selector.match_tunnel(&self.tunnels, &dst).await {
            Some(hit) => hit,
            None => {
                info!(dst = %dst, "no rule matched, dropping flow");
                return Some(Err(ProxyError::NoRoute(dst)));
            }
        };

        if tunnel.name() == REJECT_TUNNEL_ID {
            info!(dst = %dst, "transport denied");
            return Some(Err(ProxyError::DialRejected));
        }

        let bridge = Arc::new(HttpBridge::new());
        let id = random_id(16);
        self.bridges.insert(
            id.clone(),
            BridgeEntry {
                dst_addr: dst.clone(),
                handle: BridgeHandle::Http(bridge.clone()),
            },
        );

        let forward = if forward.is_empty() { None } else { Some(forward.as_str()) };
        let result = bridge.transport(request, &dst, forward, tunnel).await;
        self.bridges.remove(&id);
        Some(result)
    }

    /// Same as `serve_http` but for raw TCP streams (SOCKS5 CONNECT and
    /// HTTP CONNECT after the `200 OK` has been written).
    pub async fn serve_socket<C>(self: &Arc<Self>, client: C, dst_addr: &str) -> Result<()>
    where
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (tunnel, forward) = match self.selector.match_tunnel(&self.tunnels, dst_addr).await {
            Some(hit) => hit,
            None => {
                info!(dst = %dst_addr, "no rule matched, dropping flow");
                return Err(ProxyError::NoRoute(dst_addr.to_string()));
            }
        };

        if tunnel.name() == REJECT_TUNNEL_ID {
            info!(dst = %dst_addr, "transport denied");
            return Err(ProxyError::DialRejected);
        }

        let bridge = Arc::new(SocketBridge::new());
        let id = random_id(16);
        self.bridges.insert(
            id.clone(),
            BridgeEntry {
                dst_addr: dst_addr.to_string(),
                handle: BridgeHandle::Socket(bridge.clone()),
            },
        );

        let forward = if forward.is_empty() { None } else { Some(forward.as_str()) };
        let result = bridge.transport(client, dst_addr, forward, tunnel).await;
        self.bridges.remove(&id);
        result
    }
}

fn host_with_default_port(request: &Request<Incoming>) -> Option<String> {
    let host = request
        .uri()
        .authority()
        .map(|a| a.to_string())
        .or_else(|| {
            request
                .headers()
                .get(hyper::header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })?;
    Some(hopgate_core::addr::with_default_port(&host, 80))
}

/// Builds a bare 502 for the fail-fast REJECT path; used by the inbound
/// listener when `serve_http` returns a `DialRejected` error.
pub fn rejected_response() -> Response<BoxBody<Bytes, hyper::Error>> {
    let body = Empty::<Bytes>::new().map_err(|never: std::convert::Infallible| match never {});
    let mut resp = Response::new(BoxBody::new(body));
    *resp.status_mut() = StatusCode::BAD_GATEWAY;
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopgate_core::{LatencyConfig, ProxyConfig};

    fn test_config() -> Config {
        Config {
            global: "DIRECT".to_string(),
            latency: LatencyConfig {
                url: "http://example.com/".to_string(),
                timeout_ms: 2000,
            },
            proxies: vec![ProxyConfig {
                name: "a".to_string(),
                kind: "direct".to_string(),
                url: String::new(),
                labels: vec!["fast".to_string()],
            }],
            geoip_path: None,
        }
    }

    #[tokio::test]
    async fn reserved_tunnels_are_always_present() {
        let rules = Rules::build(
            &hopgate_core::RulesConfig {
                routes: vec![],
                groups: vec![],
            },
            None,
        );
        let engine = Engine::new(&test_config(), rules).await.unwrap();
        assert!(engine.get_tunnel(DIRECT_TUNNEL_ID).is_some());
        assert!(engine.get_tunnel(REJECT_TUNNEL_ID).is_some());
    }

    #[tokio::test]
    async fn unrecognized_dialer_type_fails_construction() {
        let mut config = test_config();
        config.proxies[0].kind = "bogus".to_string();
        let rules = Rules::build(
            &hopgate_core::RulesConfig {
                routes: vec![],
                groups: vec![],
            },
            None,
        );
        assert!(Engine::new(&config, rules).await.is_err());
    }
}
