pub mod in_memory;

use crate::shared::error::ControlPlaneResult;
use async_trait::async_trait;
use bidfleet_core::{Disk, DiskSpec, Instance, InstanceSpec, Operation};

#[cfg(test)]
use mockall::automock;

pub use in_memory::{BackendCall, BackendMethod, InMemoryComputeBackend};

/// Cloud compute API consumed by the orchestrator. Mutating calls return an
/// operation handle; `wait_operation` blocks for one backend-defined wait
/// period and returns the refreshed handle, done or not.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    async fn create_disk(&self, spec: &DiskSpec) -> ControlPlaneResult<Operation>;

    async fn get_disk(&self, zone: &str, name: &str) -> ControlPlaneResult<Disk>;

    async fn delete_disk(&self, zone: &str, name: &str) -> ControlPlaneResult<Operation>;

    async fn create_instance(&self, spec: &InstanceSpec) -> ControlPlaneResult<Operation>;

    async fn get_instance(&self, zone: &str, name: &str) -> ControlPlaneResult<Instance>;

    async fn delete_instance(&self, zone: &str, name: &str) -> ControlPlaneResult<Operation>;

    /// Zonal operations are looked up in `operation.zone`.
    async fn wait_operation(&self, operation: &Operation) -> ControlPlaneResult<Operation>;
}
