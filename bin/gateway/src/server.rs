//! Request dispatch for the gateway listener

use anyhow::Result;
use gateway_proxy::forwarder::BoxError;
use gateway_proxy::{MetricsCollector, MiddlewareChain, MiddlewareContext, RegistryProxy};
use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::tokio::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Gateway liveness endpoint
pub const HEALTH_PATH: &str = "/healthz";
/// Prometheus scrape endpoint
pub const METRICS_PATH: &str = "/metrics";

/// Serves the gateway's own endpoints and hands everything else to the proxy
pub struct Gateway {
    proxy: RegistryProxy,
    middleware: MiddlewareChain,
    metrics: MetricsCollector,
}

impl Gateway {
    pub fn new(proxy: RegistryProxy, middleware: MiddlewareChain, metrics: MetricsCollector) -> Self {
        Self {
            proxy,
            middleware,
            metrics,
        }
    }

    pub async fn handle_request<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let path = req.uri().path().to_string();
        let route = self.proxy.route_for(&path).map(str::to_string);
        let context = MiddlewareContext::from_request(&req).with_route(route);

        if let Err(e) = self.middleware.on_request(&context).await {
            debug!("Middleware on_request error: {}", e);
        }

        let response = if req.method() == Method::GET && path == HEALTH_PATH {
            text_response(StatusCode::OK, "text/plain; charset=utf-8", "OK\n".to_string())
        } else if req.method() == Method::GET && path == METRICS_PATH {
            match self.metrics.gather() {
                Ok(text) => text_response(StatusCode::OK, "text/plain; version=0.0.4", text),
                Err(e) => text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain; charset=utf-8",
                    format!("Failed to gather metrics: {}\n", e),
                ),
            }
        } else {
            self.forward(req, &context).await
        };

        if let Err(e) = self
            .middleware
            .on_response(&context, response.status().as_u16())
            .await
        {
            debug!("Middleware on_response error: {}", e);
        }
        response
    }

    async fn forward<B>(&self, req: Request<B>, context: &MiddlewareContext) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let (response, error) = self.proxy.serve(req).await;
        if let Some(e) = error {
            if let Err(mw_err) = self.middleware.on_error(context, &e.to_string()).await {
                debug!("Middleware on_error error: {}", mw_err);
            }
        }
        response.map(Full::new)
    }
}

/// Accept connections until `shutdown` resolves, then drain open connections.
///
/// In-flight requests get up to `drain_timeout` to finish before the
/// remaining connections are dropped.
pub async fn serve<F>(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    shutdown: F,
    drain_timeout: Duration,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let graceful = GracefulShutdown::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Error accepting connection: {}", e);
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let gateway = gateway.clone();

                let service = service_fn(move |req| {
                    let gateway = gateway.clone();
                    async move { Ok::<_, Infallible>(gateway.handle_request(req).await) }
                });
                let connection = graceful.watch(http1::Builder::new().serve_connection(io, service));

                tokio::task::spawn(async move {
                    if let Err(e) = connection.await {
                        debug!("Error serving connection from {}: {}", peer_addr, e);
                    }
                });
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
                break;
            }
        }
    }

    drop(listener);
    tokio::select! {
        _ = graceful.shutdown() => {
            info!("All connections drained");
        }
        _ = tokio::time::sleep(drain_timeout) => {
            warn!("Connections still open after {:?}, closing them", drain_timeout);
        }
    }
    Ok(())
}

fn text_response(status: StatusCode, content_type: &'static str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    response
}
