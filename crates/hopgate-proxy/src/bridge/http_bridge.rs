use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::warn;

use super::chunked::{is_chunked, ChunkedBody};
use super::{AtomicStatus, Status};
use crate::connector::TunnelConnector;
use crate::error::{ProxyError, Result};
use crate::tunnel::Tunnel;

const IDLE_CONNECTIONS: usize = 100;
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);
/// Expect-continue timeout the source configures (1s). Hyper's legacy
/// client has no matching knob at this level; kept here as a documented
/// tunable, not a contract (spec.md §4.6 says as much explicitly).
#[allow(dead_code)]
const EXPECT_CONTINUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Plain HTTP proxying: dial through the resolved tunnel, execute the
/// request once, stream the response back. Mirrors `pkg/core/bridge.go`'s
/// `HttpBridge`.
pub struct HttpBridge {
    status: AtomicStatus,
}

impl Default for HttpBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpBridge {
    pub fn new() -> Self {
        Self {
            status: AtomicStatus::default(),
        }
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    pub async fn transport(
        &self,
        request: Request<Incoming>,
        dst_addr: &str,
        forward: Option<&str>,
        tunnel: Arc<Tunnel>,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>> {
        self.status.set(Status::Connecting);

        let target = forward.unwrap_or(dst_addr).to_string();
        let connector = TunnelConnector::with_fixed_addr(tunnel, target);
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(IDLE_CONNECTIONS)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .build::<_, Incoming>(connector);

        let (mut parts, body) = request.into_parts();
        // Proxy clients often send an absolute-form request-target; origin
        // servers expect origin-form with the authority carried in Host.
        if let Some(path_and_query) = parts.uri.path_and_query() {
            if let Ok(uri) = Uri::builder()
                .path_and_query(path_and_query.clone())
                .build()
            {
                parts.uri = uri;
            }
        }
        let req = Request::from_parts(parts, body);

        self.status.set(Status::Transporting);
        let resp = match client.request(req).await {
            Ok(resp) => resp,
            Err(e) => {
                self.status.set(Status::Failed);
                warn!(dst = %dst_addr, error = %e, "http bridge transport failed");
                return Err(ProxyError::Other(e.to_string()));
            }
        };

        let (parts, incoming) = resp.into_parts();
        let body = if is_chunked(&parts.headers) {
            ChunkedBody::new(incoming).boxed()
        } else {
            BodyExt::boxed(incoming)
        };

        self.status.set(Status::Disconnected);
        Ok(Response::from_parts(parts, body))
    }
}
