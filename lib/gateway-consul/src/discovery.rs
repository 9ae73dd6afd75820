//! Service resolution backed by the Consul agent

use crate::ConsulClient;
use async_trait::async_trait;
use gateway_core::{Deadline, Result, ServiceRegistration, ServiceResolver};
use std::sync::Arc;
use tracing::{debug, warn};

/// ConsulResolver answers every resolution with a fresh agent query
#[derive(Clone)]
pub struct ConsulResolver {
    client: Arc<ConsulClient>,
}

impl ConsulResolver {
    pub fn new(client: Arc<ConsulClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<ConsulClient> {
        &self.client
    }
}

#[async_trait]
impl ServiceResolver for ConsulResolver {
    fn name(&self) -> &'static str {
        "consul"
    }

    async fn list_services(&self, deadline: Deadline) -> Result<Vec<ServiceRegistration>> {
        match self.client.list_services(deadline).await {
            Ok(services) => {
                debug!("Fetched {} registrations from {}", services.len(), self.client.base_url());
                Ok(services)
            }
            Err(e) => {
                warn!("Registry query to {} failed: {}", self.client.base_url(), e);
                Err(e.into())
            }
        }
    }
}
