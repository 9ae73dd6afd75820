//! Registry-resolving HTTP reverse proxy
pub mod cache;
pub mod forwarder;
pub mod http;
pub mod load_balancer;
pub mod metrics;
pub mod middleware;

pub use cache::CachingResolver;
pub use forwarder::{RequestForwarder, UpstreamTarget};
pub use http::{ProxyTimeouts, RegistryProxy};
pub use load_balancer::Selector;
pub use metrics::{MetricsCollector, MetricsMiddleware};
pub use middleware::{LoggingMiddleware, Middleware, MiddlewareChain, MiddlewareContext};
