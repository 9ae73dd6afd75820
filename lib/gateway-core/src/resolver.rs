//! Service resolution capability

use crate::{Address, Deadline, GatewayError, Result, ServiceRegistration};
use async_trait::async_trait;
use std::sync::Arc;

/// Resolves logical service names against a registry snapshot.
///
/// Implementors only need `list_services`; name matching is shared so every
/// registry backend picks the same instance for the same snapshot.
#[async_trait]
pub trait ServiceResolver: Send + Sync {
    /// Human-readable backend name for logs
    fn name(&self) -> &'static str {
        "resolver"
    }

    /// All currently registered services, in the registry's snapshot order
    async fn list_services(&self, deadline: Deadline) -> Result<Vec<ServiceRegistration>>;

    /// Every registration whose name equals `service`, in snapshot order.
    ///
    /// Returns `ServiceNotFound` when none match.
    async fn resolve_all(
        &self,
        service: &str,
        deadline: Deadline,
    ) -> Result<Vec<ServiceRegistration>> {
        let matching: Vec<ServiceRegistration> = self
            .list_services(deadline)
            .await?
            .into_iter()
            .filter(|registration| registration.name == service)
            .collect();

        if matching.is_empty() {
            return Err(GatewayError::ServiceNotFound(service.to_string()));
        }
        Ok(matching)
    }

    /// Address of the first registration named `service`
    async fn resolve(&self, service: &str, deadline: Deadline) -> Result<Address> {
        let mut matching = self.resolve_all(service, deadline).await?;
        Ok(matching.swap_remove(0).address)
    }
}

#[async_trait]
impl<R: ServiceResolver + ?Sized> ServiceResolver for Arc<R> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn list_services(&self, deadline: Deadline) -> Result<Vec<ServiceRegistration>> {
        (**self).list_services(deadline).await
    }

    async fn resolve_all(
        &self,
        service: &str,
        deadline: Deadline,
    ) -> Result<Vec<ServiceRegistration>> {
        (**self).resolve_all(service, deadline).await
    }

    async fn resolve(&self, service: &str, deadline: Deadline) -> Result<Address> {
        (**self).resolve(service, deadline).await
    }
}
