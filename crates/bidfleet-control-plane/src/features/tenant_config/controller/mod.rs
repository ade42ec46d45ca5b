use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::features::tenant_config::service::TenantConfigRefresher;

#[derive(Clone)]
pub struct TenantConfigRefreshController {
    service: Arc<TenantConfigRefresher>,
    interval: Duration,
}

impl TenantConfigRefreshController {
    pub fn new(service: Arc<TenantConfigRefresher>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Reloads every `interval`, starting one interval from now. A failed
    /// reload leaves the current snapshot in place.
    pub fn spawn_periodic_refresh(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
            loop {
                ticker.tick().await;

                match self.service.refresh().await {
                    Ok(version) => debug!(version, "Periodic tenant configuration refresh"),
                    Err(error) => {
                        warn!(error = %error, "Failed to refresh tenant configuration")
                    }
                }
            }
        })
    }

    pub async fn refresh_now(&self) -> Result<u64, bidfleet_core::ErrorResponse> {
        self.service.refresh().await.map_err(|e| e.into())
    }
}
