//! Middleware framework for request/response observation

use anyhow::Result;
use hyper::Request;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, span, Instrument, Level};

/// Context passed through middleware chain
#[derive(Clone, Debug)]
pub struct MiddlewareContext {
    /// Request path
    pub path: String,
    /// Request method
    pub method: String,
    /// Matched route prefix, if any
    pub route: Option<String>,
    /// Number of request headers
    pub header_count: usize,
    /// When the gateway started handling the request
    pub started_at: Instant,
}

impl MiddlewareContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            route: None,
            header_count: 0,
            started_at: Instant::now(),
        }
    }

    /// Create a new middleware context from a request
    pub fn from_request<B>(req: &Request<B>) -> Self {
        Self {
            header_count: req.headers().len(),
            ..Self::new(req.method().as_str(), req.uri().path())
        }
    }

    pub fn with_route(mut self, route: Option<String>) -> Self {
        self.route = route;
        self
    }

    /// Route label for metrics; unmatched requests share one label
    pub fn route_label(&self) -> &str {
        self.route.as_deref().unwrap_or("unmatched")
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Middleware trait for processing requests and responses
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str {
        "UnnamedMiddleware"
    }

    /// Called before request is processed
    async fn on_request(&self, _context: &MiddlewareContext) -> Result<()> {
        Ok(())
    }

    /// Called once the response status is known
    async fn on_response(&self, _context: &MiddlewareContext, _status: u16) -> Result<()> {
        Ok(())
    }

    /// Called when the gateway could not produce a backend response
    async fn on_error(&self, _context: &MiddlewareContext, _error: &str) -> Result<()> {
        Ok(())
    }
}

/// Chain of middleware to execute in order
#[derive(Clone)]
pub struct MiddlewareChain {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
        }
    }

    /// Add middleware to the chain
    pub fn add<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Process request through all middleware
    pub async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        for mw in &self.middleware {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            mw.on_request(context).instrument(span).await?;
        }
        Ok(())
    }

    /// Process response through all middleware (in reverse order)
    pub async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        for mw in self.middleware.iter().rev() {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            mw.on_response(context, status).instrument(span).await?;
        }
        Ok(())
    }

    /// Process error through all middleware
    pub async fn on_error(&self, context: &MiddlewareContext, error: &str) -> Result<()> {
        for mw in &self.middleware {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            mw.on_error(context, error).instrument(span).await?;
        }
        Ok(())
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Logs request and response lines
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }

    async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        debug!(
            method = %context.method,
            path = %context.path,
            route = context.route_label(),
            headers = context.header_count,
            "request received"
        );
        Ok(())
    }

    async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        debug!(
            method = %context.method,
            path = %context.path,
            status,
            duration_ms = context.elapsed().as_millis() as u64,
            "response sent"
        );
        Ok(())
    }

    async fn on_error(&self, context: &MiddlewareContext, error: &str) -> Result<()> {
        debug!(method = %context.method, path = %context.path, error, "request failed");
        Ok(())
    }
}
