//! In-memory service registry

use crate::{Deadline, Result, ServiceRegistration, ServiceResolver};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// ServiceRegistry keeps registrations in insertion order.
///
/// Backs the `static` registry kind and serves as the resolver in tests.
pub struct ServiceRegistry {
    services: Arc<RwLock<Vec<ServiceRegistration>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Create a registry seeded with `registrations`
    pub fn with_services(registrations: Vec<ServiceRegistration>) -> Self {
        Self {
            services: Arc::new(RwLock::new(registrations)),
        }
    }

    /// Register or replace a registration.
    ///
    /// A registration whose id already exists is replaced in place.
    pub async fn register(&self, registration: ServiceRegistration) {
        let mut services = self.services.write().await;
        match services.iter_mut().find(|s| s.id == registration.id) {
            Some(existing) => *existing = registration.clone(),
            None => services.push(registration.clone()),
        }

        debug!(
            "Registered service {} ({}) at {}",
            registration.name, registration.id, registration.address
        );
    }

    /// Remove a registration by id, returning whether it existed
    pub async fn deregister(&self, id: &str) -> bool {
        let mut services = self.services.write().await;
        let before = services.len();
        services.retain(|s| s.id != id);
        let removed = services.len() != before;
        debug!("Deregistered service {} (existed: {})", id, removed);
        removed
    }

    /// Snapshot of every registration
    pub async fn snapshot(&self) -> Vec<ServiceRegistration> {
        self.services.read().await.clone()
    }

    pub async fn service_count(&self) -> usize {
        self.services.read().await.len()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceResolver for ServiceRegistry {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn list_services(&self, _deadline: Deadline) -> Result<Vec<ServiceRegistration>> {
        Ok(self.snapshot().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, GatewayError};
    use std::time::Duration;

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(1))
    }

    fn registration(id: &str, name: &str, host: &str, port: u16) -> ServiceRegistration {
        ServiceRegistration::new(id, name, Address::new(host, port))
    }

    #[tokio::test]
    async fn test_resolve_first_match() {
        let registry = ServiceRegistry::with_services(vec![
            registration("users-1", "users-service", "10.0.0.2", 4001),
            registration("auth-1", "auth-service", "10.0.0.5", 4000),
            registration("auth-2", "auth-service", "10.0.0.6", 4000),
        ]);

        let address = registry.resolve("auth-service", deadline()).await.unwrap();
        assert_eq!(address, Address::new("10.0.0.5", 4000));

        // Same snapshot, same answer
        let again = registry.resolve("auth-service", deadline()).await.unwrap();
        assert_eq!(address, again);
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        let registry = ServiceRegistry::with_services(vec![registration(
            "users-1",
            "users-service",
            "10.0.0.2",
            4001,
        )]);

        let err = registry.resolve("auth-service", deadline()).await.unwrap_err();
        assert!(matches!(err, GatewayError::ServiceNotFound(ref name) if name == "auth-service"));
    }

    #[tokio::test]
    async fn test_resolve_all_keeps_snapshot_order() {
        let registry = ServiceRegistry::new();
        registry.register(registration("auth-b", "auth-service", "10.0.0.6", 4000)).await;
        registry.register(registration("auth-a", "auth-service", "10.0.0.5", 4000)).await;

        let all = registry.resolve_all("auth-service", deadline()).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["auth-b", "auth-a"]);
    }

    #[tokio::test]
    async fn test_register_replaces_same_id() {
        let registry = ServiceRegistry::new();
        registry.register(registration("auth-1", "auth-service", "10.0.0.5", 4000)).await;
        registry.register(registration("auth-1", "auth-service", "10.0.0.9", 4000)).await;

        assert_eq!(registry.service_count().await, 1);
        let address = registry.resolve("auth-service", deadline()).await.unwrap();
        assert_eq!(address.host, "10.0.0.9");
    }

    #[tokio::test]
    async fn test_deregister() {
        let registry = ServiceRegistry::new();
        registry.register(registration("auth-1", "auth-service", "10.0.0.5", 4000)).await;

        assert!(registry.deregister("auth-1").await);
        assert!(!registry.deregister("auth-1").await);
        assert_eq!(registry.service_count().await, 0);
        assert!(registry.resolve("auth-service", deadline()).await.is_err());
    }
}
