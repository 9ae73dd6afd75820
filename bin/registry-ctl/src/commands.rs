//! Registry operations behind the CLI subcommands

use anyhow::{Context, Result};
use gateway_consul::{ConsulClient, ConsulResolver};
use gateway_core::{
    Address, Deadline, SelectionPolicy, ServiceRegistration, ServiceResolver,
};
use gateway_proxy::Selector;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// One line per registration: `id name host:port [tags]`
pub fn format_registration(registration: &ServiceRegistration) -> String {
    let mut line = format!(
        "{} {} {}",
        registration.id, registration.name, registration.address
    );
    if !registration.tags.is_empty() {
        line.push_str(&format!(" [{}]", registration.tags.join(",")));
    }
    line
}

pub async fn list(client: &ConsulClient, timeout: Duration) -> Result<Vec<String>> {
    let registrations = client.list_services(Deadline::after(timeout)).await?;
    Ok(registrations.iter().map(format_registration).collect())
}

/// Build a registration, generating `<name>-<uuid>` when no id is given
pub fn registration(
    id: Option<String>,
    name: String,
    host: String,
    port: u16,
    tags: Vec<String>,
) -> ServiceRegistration {
    let id = id.unwrap_or_else(|| format!("{}-{}", name, uuid::Uuid::new_v4()));
    ServiceRegistration {
        id,
        name,
        address: Address::new(host, port),
        tags,
    }
}

/// Resolve `name` the way the gateway would under `policy`
pub async fn resolve(
    client: &ConsulClient,
    name: &str,
    policy: SelectionPolicy,
    timeout: Duration,
) -> Result<ServiceRegistration> {
    let resolver = ConsulResolver::new(Arc::new(client.clone()));
    let candidates = resolver
        .resolve_all(name, Deadline::after(timeout))
        .await?;
    debug!("{} has {} registrations", name, candidates.len());

    Selector::new(policy)
        .select(&candidates)
        .cloned()
        .with_context(|| format!("no registration selected for {}", name))
}

/// Log the registry snapshot every `interval` until interrupted
pub async fn watch(client: &ConsulClient, interval: Duration, timeout: Duration) -> Result<()> {
    info!("Watching registry every {:?}", interval);
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match client.list_services(Deadline::after(timeout)).await {
                    Ok(registrations) => {
                        info!("Registry has {} registrations", registrations.len());
                        for registration in &registrations {
                            debug!("  {}", format_registration(registration));
                        }
                    }
                    Err(e) => error!("Error listing registry: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                return Ok(());
            }
        }
    }
}
