use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use async_trait::async_trait;
use bidfleet_core::TenantConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Resolves per-tenant defaults for the spec builder.
#[async_trait]
pub trait TenantConfigProvider: Send + Sync {
    async fn tenant(&self, tenant_id: &str) -> ControlPlaneResult<Option<Arc<TenantConfig>>>;
}

/// Where tenant configuration is loaded from on each refresh.
#[async_trait]
pub trait TenantConfigSource: Send + Sync {
    async fn load(&self) -> ControlPlaneResult<Vec<TenantConfig>>;

    fn describe(&self) -> String;
}

/// Immutable view of every tenant at one version.
#[derive(Debug, Default)]
pub struct TenantConfigSnapshot {
    pub version: u64,
    pub tenants: HashMap<String, Arc<TenantConfig>>,
}

impl TenantConfigSnapshot {
    fn new(version: u64, tenants: Vec<TenantConfig>) -> Self {
        Self {
            version,
            tenants: tenants
                .into_iter()
                .map(|tenant| (tenant.tenant_id.clone(), Arc::new(tenant)))
                .collect(),
        }
    }

    pub fn get(&self, tenant_id: &str) -> Option<Arc<TenantConfig>> {
        self.tenants.get(tenant_id).cloned()
    }
}

/// Single-writer store. `replace` swaps in a new snapshot atomically; readers
/// keep whichever snapshot they already hold.
pub struct TenantConfigStore {
    sender: watch::Sender<Arc<TenantConfigSnapshot>>,
}

impl TenantConfigStore {
    pub fn new(tenants: Vec<TenantConfig>) -> Self {
        let (sender, _) = watch::channel(Arc::new(TenantConfigSnapshot::new(0, tenants)));
        Self { sender }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn snapshot(&self) -> Arc<TenantConfigSnapshot> {
        self.sender.borrow().clone()
    }

    /// Installs `tenants` as the next version and returns that version.
    pub fn replace(&self, tenants: Vec<TenantConfig>) -> u64 {
        let mut version = 0;
        self.sender.send_modify(|current| {
            version = current.version + 1;
            *current = Arc::new(TenantConfigSnapshot::new(version, tenants));
        });
        version
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<TenantConfigSnapshot>> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl TenantConfigProvider for TenantConfigStore {
    async fn tenant(&self, tenant_id: &str) -> ControlPlaneResult<Option<Arc<TenantConfig>>> {
        Ok(self.snapshot().get(tenant_id))
    }
}

/// JSON array of tenant configurations on local disk.
pub struct FileTenantConfigSource {
    path: PathBuf,
}

impl FileTenantConfigSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl TenantConfigSource for FileTenantConfigSource {
    async fn load(&self) -> ControlPlaneResult<Vec<TenantConfig>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ControlPlaneError::Unknown(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        parse_tenants(&raw)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Parses and checks a tenant list: ids must be present and unique.
pub fn parse_tenants(raw: &str) -> ControlPlaneResult<Vec<TenantConfig>> {
    let tenants: Vec<TenantConfig> = serde_json::from_str(raw).map_err(|e| {
        ControlPlaneError::ValidationError(format!("Malformed tenant configuration: {}", e))
    })?;

    let mut seen = std::collections::HashSet::new();
    for tenant in &tenants {
        if tenant.tenant_id.trim().is_empty() {
            return Err(ControlPlaneError::ValidationError(
                "Tenant configuration without tenant_id".to_string(),
            ));
        }
        if !seen.insert(tenant.tenant_id.as_str()) {
            return Err(ControlPlaneError::ValidationError(format!(
                "Duplicate tenant_id {}",
                tenant.tenant_id
            )));
        }
    }

    Ok(tenants)
}
