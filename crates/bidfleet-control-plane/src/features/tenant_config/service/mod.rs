use crate::features::observability::controller::global_observability_controller;
use crate::features::tenant_config::repo::{TenantConfigSource, TenantConfigStore};
use crate::shared::error::ControlPlaneResult;
use std::sync::Arc;
use tracing::info;

/// Reloads tenant configuration from its source into the store. The store is
/// only touched when a load succeeds.
pub struct TenantConfigRefresher {
    store: Arc<TenantConfigStore>,
    source: Arc<dyn TenantConfigSource>,
}

impl TenantConfigRefresher {
    pub fn new(store: Arc<TenantConfigStore>, source: Arc<dyn TenantConfigSource>) -> Self {
        Self { store, source }
    }

    pub async fn refresh(&self) -> ControlPlaneResult<u64> {
        let tenants = self.source.load().await?;
        let count = tenants.len();
        let version = self.store.replace(tenants);

        global_observability_controller().set_tenant_config_version(version);
        info!(
            source = %self.source.describe(),
            version,
            tenants = count,
            "Tenant configuration refreshed"
        );
        Ok(version)
    }
}
