//! Prometheus metrics for the gateway

use crate::middleware::{Middleware, MiddlewareContext};
use anyhow::Result;
use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::debug;

/// Prometheus metrics collector; clones share the same registry
#[derive(Clone)]
pub struct MetricsCollector {
    /// Requests received, by method and route prefix
    pub requests_total: CounterVec,
    /// Responses sent, by status code
    pub responses_total: CounterVec,
    /// End-to-end latency, by method and route prefix
    pub request_duration_seconds: HistogramVec,
    /// Resolution failures, by logical service and failure kind
    pub resolution_failures_total: CounterVec,
    /// Requests the gateway could not route or forward
    pub errors_total: Counter,
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let requests_total = CounterVec::new(
            Opts::new("gateway_requests_total", "Total requests received"),
            &["method", "route"],
        )?;

        let responses_total = CounterVec::new(
            Opts::new("gateway_responses_total", "Total responses by status"),
            &["status"],
        )?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_duration_seconds",
                "Request latency in seconds",
            ),
            &["method", "route"],
        )?;

        let resolution_failures_total = CounterVec::new(
            Opts::new(
                "gateway_resolution_failures_total",
                "Failed service resolutions by service and reason",
            ),
            &["service", "reason"],
        )?;

        let errors_total = Counter::new("gateway_errors_total", "Total gateway errors")?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(responses_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(resolution_failures_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self {
            requests_total,
            responses_total,
            request_duration_seconds,
            resolution_failures_total,
            errors_total,
            registry,
        })
    }

    /// Record a resolution failure for `service`
    pub fn record_resolution_failure(&self, service: &str, reason: &str) {
        self.resolution_failures_total
            .with_label_values(&[service, reason])
            .inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Records request, response and error metrics
pub struct MetricsMiddleware {
    pub collector: MetricsCollector,
}

impl MetricsMiddleware {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }
}

#[async_trait::async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "MetricsMiddleware"
    }

    async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        self.collector
            .requests_total
            .with_label_values(&[context.method.as_str(), context.route_label()])
            .inc();
        Ok(())
    }

    async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        debug!("Recording response metrics for {} {} -> {}", context.method, context.path, status);

        self.collector
            .responses_total
            .with_label_values(&[status.to_string().as_str()])
            .inc();
        self.collector
            .request_duration_seconds
            .with_label_values(&[context.method.as_str(), context.route_label()])
            .observe(context.elapsed().as_secs_f64());
        Ok(())
    }

    async fn on_error(&self, _context: &MiddlewareContext, _error: &str) -> Result<()> {
        self.collector.errors_total.inc();
        Ok(())
    }
}
