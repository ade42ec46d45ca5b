use crate::features::compute::repo::ComputeBackend;
use crate::features::operations::service::OperationWaiter;
use crate::shared::error::ControlPlaneResult;
use bidfleet_core::{disk_link, Disk, DiskSpec};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Creates root persistent disks and waits for them to become usable.
pub struct DiskProvisioner {
    backend: Arc<dyn ComputeBackend>,
    waiter: OperationWaiter,
    timeout: Duration,
}

impl DiskProvisioner {
    pub fn new(backend: Arc<dyn ComputeBackend>, waiter: OperationWaiter, timeout: Duration) -> Self {
        Self {
            backend,
            waiter,
            timeout,
        }
    }

    /// Single create-and-wait; retries are the caller's decision.
    pub async fn provision(&self, spec: DiskSpec) -> ControlPlaneResult<Disk> {
        info!(disk = %spec.name, zone = %spec.zone, image = %spec.source_image, "Creating boot disk");

        let operation = self.backend.create_disk(&spec).await?;
        self.waiter.wait(operation, self.timeout).await?;
        let disk = self.backend.get_disk(&spec.zone, &spec.name).await?;

        info!(disk = %disk.name, zone = %disk.zone, status = %disk.status, "Boot disk ready");
        Ok(disk)
    }

    /// Deletes a disk left behind by a failed instance create. A disk that is
    /// already gone counts as released.
    pub async fn release(&self, zone: &str, name: &str) -> ControlPlaneResult<()> {
        let link = disk_link(zone, name);

        let released = match self.backend.delete_disk(zone, name).await {
            Ok(operation) => self.waiter.wait(operation, self.timeout).await.map(|_| ()),
            Err(error) => Err(error),
        };

        match released {
            Err(error) if error.is_not_found_for(&link) => {
                warn!(disk = %name, zone = %zone, "Orphaned disk already deleted");
                Ok(())
            }
            Err(error) => Err(error),
            Ok(()) => {
                info!(disk = %name, zone = %zone, "Orphaned boot disk deleted");
                Ok(())
            }
        }
    }
}
