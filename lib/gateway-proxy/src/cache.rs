//! Short-lived resolution cache

use async_trait::async_trait;
use gateway_core::{Deadline, Result, ServiceRegistration, ServiceResolver};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

struct CachedResolution {
    registrations: Vec<ServiceRegistration>,
    expires_at: Instant,
}

/// Wraps a resolver and remembers successful resolutions for `ttl`.
///
/// Failures are never cached, so an absent service is looked up again on the
/// next request.
pub struct CachingResolver<R> {
    inner: R,
    ttl: Duration,
    entries: Mutex<LruCache<String, CachedResolution>>,
}

impl<R: ServiceResolver> CachingResolver<R> {
    pub fn new(inner: R, ttl: Duration, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Drop the cached resolution for `service`
    pub fn invalidate(&self, service: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.pop(service);
        }
    }

    /// Number of cached services, expired entries included
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, service: &str) -> Option<Vec<ServiceRegistration>> {
        let mut entries = self.entries.lock().ok()?;
        let fresh = entries
            .get(service)
            .filter(|cached| cached.expires_at > Instant::now())
            .map(|cached| cached.registrations.clone());
        if fresh.is_none() {
            entries.pop(service);
        }
        fresh
    }

    fn store(&self, service: &str, registrations: &[ServiceRegistration]) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(
                service.to_string(),
                CachedResolution {
                    registrations: registrations.to_vec(),
                    expires_at: Instant::now() + self.ttl,
                },
            );
        }
    }
}

#[async_trait]
impl<R: ServiceResolver> ServiceResolver for CachingResolver<R> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn list_services(&self, deadline: Deadline) -> Result<Vec<ServiceRegistration>> {
        self.inner.list_services(deadline).await
    }

    async fn resolve_all(
        &self,
        service: &str,
        deadline: Deadline,
    ) -> Result<Vec<ServiceRegistration>> {
        if let Some(registrations) = self.lookup(service) {
            debug!("Resolution cache hit for {}", service);
            return Ok(registrations);
        }

        let registrations = self.inner.resolve_all(service, deadline).await?;
        self.store(service, &registrations);
        Ok(registrations)
    }
}
