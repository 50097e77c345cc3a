use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty};
use hopgate_proxy::engine::rejected_response;
use hopgate_proxy::Engine;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Inbound HTTP proxy listener: plain requests are forwarded through
/// `Engine::serve_http`; `CONNECT` requests are hijacked via hyper's
/// upgrade mechanism and handed to `Engine::serve_socket`, mirroring
/// `pkg/port/http/server.go`'s `handleHTTP`/`handleTunneling`.
pub async fn serve(
    engine: Arc<Engine>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "http inbound listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "http accept failed");
                        continue;
                    }
                };
                let engine = engine.clone();
                let conn_shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| handle(engine.clone(), req));
                    let conn = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades();
                    tokio::select! {
                        res = conn => {
                            if let Err(e) = res {
                                warn!(%peer, error = %e, "http connection ended with error");
                            }
                        }
                        _ = conn_shutdown.cancelled() => {}
                    }
                });
            }
        }
    }
    Ok(())
}

async fn handle(
    engine: Arc<Engine>,
    req: Request<Incoming>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible> {
    if req.method() == Method::CONNECT {
        return Ok(handle_connect(engine, req));
    }
    match engine.serve_http(req).await {
        Some(Ok(resp)) => Ok(resp),
        Some(Err(_)) => Ok(rejected_response()),
        None => Ok(status_response(StatusCode::BAD_GATEWAY)),
    }
}

/// Hijacks the connection, writes `HTTP/1.1 200 OK`, and hands the raw
/// socket to `Engine::serve_socket` with `dst = r.host`.
fn handle_connect(engine: Arc<Engine>, mut req: Request<Incoming>) -> Response<BoxBody<Bytes, hyper::Error>> {
    let Some(authority) = req.uri().authority().cloned() else {
        return status_response(StatusCode::BAD_REQUEST);
    };
    let dst = hopgate_core::addr::with_default_port(authority.as_str(), 443);

    tokio::spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                let io = TokioIo::new(upgraded);
                if let Err(e) = engine.serve_socket(io, &dst).await {
                    warn!(dst = %dst, error = %e, "connect tunnel failed");
                }
            }
            Err(e) => warn!(error = %e, "connect upgrade failed"),
        }
    });

    Response::new(empty_body())
}

fn status_response(status: StatusCode) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut resp = Response::new(empty_body());
    *resp.status_mut() = status;
    resp
}

fn empty_body() -> BoxBody<Bytes, hyper::Error> {
    Empty::new().map_err(|never: Infallible| match never {}).boxed()
}
