//! Registry-resolving reverse proxy

use crate::forwarder::{BoxError, RequestForwarder, UpstreamTarget};
use crate::load_balancer::Selector;
use crate::metrics::MetricsCollector;
use gateway_core::{
    Deadline, GatewayError, Result, SelectionPolicy, ServiceRegistration, ServiceResolver,
    RouteTable,
};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Header marking responses produced by the gateway itself
pub const GATEWAY_ERROR_HEADER: &str = "x-gateway-error";

/// Default cap on a buffered request body
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Deadlines applied to each request
#[derive(Clone, Copy, Debug)]
pub struct ProxyTimeouts {
    /// Bound on the registry query
    pub registry: Duration,
    /// Bound on the backend exchange
    pub upstream: Duration,
    /// Bound on receiving the caller's request body
    pub request_body: Duration,
}

impl Default for ProxyTimeouts {
    fn default() -> Self {
        Self {
            registry: Duration::from_secs(5),
            upstream: Duration::from_secs(30),
            request_body: Duration::from_secs(30),
        }
    }
}

/// Resolves the backend for each request's route and forwards the request to it.
///
/// Holds no per-request state; the resolver and forwarder are shared.
pub struct RegistryProxy {
    resolver: Arc<dyn ServiceResolver>,
    routes: RouteTable,
    forwarder: Arc<RequestForwarder>,
    selector: Selector,
    timeouts: ProxyTimeouts,
    max_body_size: usize,
    metrics: Option<MetricsCollector>,
}

impl RegistryProxy {
    pub fn new(
        resolver: Arc<dyn ServiceResolver>,
        routes: RouteTable,
        forwarder: Arc<RequestForwarder>,
        timeouts: ProxyTimeouts,
    ) -> Self {
        Self {
            resolver,
            routes,
            forwarder,
            selector: Selector::default(),
            timeouts,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            metrics: None,
        }
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub fn with_selection_policy(mut self, policy: SelectionPolicy) -> Self {
        self.selector = Selector::new(policy);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn resolver(&self) -> &Arc<dyn ServiceResolver> {
        &self.resolver
    }

    /// Route prefix handling `path`, if any
    pub fn route_for(&self, path: &str) -> Option<&str> {
        self.routes
            .match_request(path)
            .map(|matched| matched.route.prefix.as_str())
    }

    /// Resolve `service` to one registration before `deadline`
    pub async fn resolve(&self, service: &str, deadline: Deadline) -> Result<ServiceRegistration> {
        let candidates = deadline
            .run(self.resolver.resolve_all(service, deadline), || {
                GatewayError::RegistryTimeout
            })
            .await?;

        let selected = self
            .selector
            .select(&candidates)
            .cloned()
            .ok_or_else(|| GatewayError::ServiceNotFound(service.to_string()))?;

        debug!(
            "Resolved {} to {} ({} of {} candidates)",
            service,
            selected.address,
            selected.id,
            candidates.len()
        );
        Ok(selected)
    }

    /// Resolve and forward `request`, returning the backend's response.
    ///
    /// Errors mean the gateway could not route the request; backend error
    /// statuses are returned as successful responses.
    pub async fn proxy<B>(&self, request: Request<B>) -> Result<Response<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_string();

        let matched = self
            .routes
            .match_request(&path_and_query)
            .ok_or_else(|| GatewayError::RouteNotFound(request.uri().path().to_string()))?;
        let service = matched.route.service.as_str();

        let registry_deadline = Deadline::after(self.timeouts.registry);
        let registration = match self.resolve(service, registry_deadline).await {
            Ok(registration) => registration,
            Err(e) => {
                warn!("Cannot route {} to {}: {}", request.uri().path(), service, e);
                if let Some(metrics) = &self.metrics {
                    metrics.record_resolution_failure(service, e.kind());
                }
                return Err(e);
            }
        };

        let (parts, body) = request.into_parts();
        let body = RequestForwarder::read_body(
            body,
            self.max_body_size,
            Deadline::after(self.timeouts.request_body),
        )
        .await?;
        let request = Request::from_parts(parts, body);

        let target = UpstreamTarget {
            service: service.to_string(),
            address: registration.address,
            path_and_query: matched.rewritten,
            preserve_host: matched.route.preserve_host,
        };

        let upstream_deadline = Deadline::after(self.timeouts.upstream);
        self.forwarder
            .forward(request, &target, upstream_deadline)
            .await
    }

    /// Like `proxy`, rendering a failure as a gateway error response.
    ///
    /// The error is returned alongside the rendered response so callers can
    /// still report it.
    pub async fn serve<B>(&self, request: Request<B>) -> (Response<Bytes>, Option<GatewayError>)
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let service = self
            .routes
            .match_request(request.uri().path())
            .map(|matched| matched.route.service.clone());

        match self.proxy(request).await {
            Ok(response) => (response, None),
            Err(e) => (Self::error_response(&e, service.as_deref()), Some(e)),
        }
    }

    pub async fn handle<B>(&self, request: Request<B>) -> Response<Bytes>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        self.serve(request).await.0
    }

    /// Render a gateway error as a plain-text response naming the service
    pub fn error_response(err: &GatewayError, service: Option<&str>) -> Response<Bytes> {
        let status = StatusCode::from_u16(err.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let reason = status.canonical_reason().unwrap_or("Error");

        let message = match service {
            Some(service) if err.is_routing_failure() => {
                format!("{}: unable to route to {}: {}\n", reason, service, err)
            }
            _ => format!("{}: {}\n", reason, err),
        };

        let mut response = Response::new(Bytes::from(message));
        *response.status_mut() = status;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
            .headers_mut()
            .insert(GATEWAY_ERROR_HEADER, HeaderValue::from_static(err.kind()));
        response
    }
}
