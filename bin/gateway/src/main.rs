use anyhow::{Context, Result};
use clap::Parser;
use gateway_consul::{ConsulClient, ConsulResolver};
use gateway_core::{GatewayConfig, RegistryKind, ServiceRegistry, ServiceResolver};
use gateway_proxy::{
    CachingResolver, LoggingMiddleware, MetricsCollector, MetricsMiddleware, MiddlewareChain,
    ProxyTimeouts, RegistryProxy, RequestForwarder,
};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod server;
mod telemetry;

use server::Gateway;

/// API gateway routing requests to services found in the registry
#[derive(Parser, Debug)]
#[command(name = "gateway", version)]
struct Args {
    /// YAML configuration file (falls back to GATEWAY_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = GatewayConfig::load(args.config.as_deref()).context("invalid configuration")?;
    telemetry::init(&config.logging)?;

    info!("Starting gateway...");

    let resolver = build_resolver(&config)?;
    info!("Service resolver initialized ({})", resolver.name());

    let metrics = MetricsCollector::new()?;

    let forwarder = Arc::new(RequestForwarder::new(config.timeouts.connect));
    let timeouts = ProxyTimeouts {
        registry: config.timeouts.registry,
        upstream: config.timeouts.upstream,
        request_body: config.timeouts.request_body,
    };
    let proxy = RegistryProxy::new(resolver, config.route_table()?, forwarder, timeouts)
        .with_max_body_size(config.limits.max_request_body)
        .with_selection_policy(config.resolution.policy)
        .with_metrics(metrics.clone());
    for route in proxy.routes().routes() {
        info!("  {} -> {}", route.prefix, route.service);
    }

    let middleware = MiddlewareChain::new()
        .add(LoggingMiddleware)
        .add(MetricsMiddleware::new(metrics.clone()));

    let gateway = Arc::new(Gateway::new(proxy, middleware, metrics));

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!("HTTP server listening on {}", config.listen);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let drain_timeout = config.timeouts.request_body + config.timeouts.upstream;
    server::serve(listener, gateway, shutdown, drain_timeout).await
}

/// Build the configured registry client, wrapped in the resolution cache when enabled
fn build_resolver(config: &GatewayConfig) -> Result<Arc<dyn ServiceResolver>> {
    let resolver: Arc<dyn ServiceResolver> = match config.registry.kind {
        RegistryKind::Consul => {
            let client = ConsulClient::new(&config.registry.address, config.registry.token.clone())?;
            info!("Using Consul registry at {}", config.registry.address);
            Arc::new(ConsulResolver::new(Arc::new(client)))
        }
        RegistryKind::Static => {
            let registrations = config.registry.static_registrations();
            info!("Using static registry with {} entries", registrations.len());
            Arc::new(ServiceRegistry::with_services(registrations))
        }
    };

    match config.resolution.cache_ttl {
        Some(ttl) => {
            let capacity = NonZeroUsize::new(config.resolution.cache_capacity)
                .context("resolution.cache_capacity must be positive")?;
            info!("Resolution cache enabled (ttl {:?}, capacity {})", ttl, capacity);
            Ok(Arc::new(CachingResolver::new(resolver, ttl, capacity)))
        }
        None => Ok(resolver),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::{Deadline, GatewayError};
    use std::time::Duration;

    const STATIC_CONFIG: &str = r#"
registry:
  kind: static
  services:
    - name: auth-service
      host: 127.0.0.1
      port: 4000
routes:
  - prefix: /auth
    service: auth-service
resolution:
  cache_ttl: 5s
"#;

    #[tokio::test]
    async fn test_static_resolver_from_config() {
        let config = GatewayConfig::from_yaml(STATIC_CONFIG).unwrap();
        let resolver = build_resolver(&config).unwrap();

        let deadline = Deadline::after(Duration::from_secs(1));
        let address = resolver.resolve("auth-service", deadline).await.unwrap();
        assert_eq!(address.to_string(), "127.0.0.1:4000");

        let err = resolver.resolve("fleet-service", deadline).await.unwrap_err();
        assert!(matches!(err, GatewayError::ServiceNotFound(_)));
    }

    #[test]
    fn test_consul_resolver_rejects_bad_address() {
        let mut config = GatewayConfig::default();
        config.registry.address = "not a url".to_string();
        assert!(build_resolver(&config).is_err());
    }
}
