use crate::features::instance_lifecycle::service::InstanceLifecycleService;
use crate::shared::types::{
    CancellationToken, CreateInstanceRequest, CreateOutcome, DeleteInstanceRequest,
    DeleteOutcome, GetInstanceRequest, ResourceSnapshot,
};
use std::sync::Arc;
use tracing::info;

/// Controller for instance lifecycle API endpoints
pub struct InstanceLifecycleController {
    service: Arc<InstanceLifecycleService>,
}

impl InstanceLifecycleController {
    pub fn new(service: Arc<InstanceLifecycleService>) -> Self {
        Self { service }
    }

    /// Handle create instance request
    /// Thin wrapper that delegates to service
    pub async fn create_instance(
        &self,
        request: CreateInstanceRequest,
        cancel: &CancellationToken,
    ) -> Result<CreateOutcome, bidfleet_core::ErrorResponse> {
        info!(
            tenant_id = %request.tenant_id,
            kind = %request.kind,
            zone = %request.zone,
            "Received create instance request"
        );

        self.service
            .create_instance(request, cancel)
            .await
            .map_err(|e| e.into())
    }

    /// Handle delete instance request
    pub async fn delete_instance(
        &self,
        request: DeleteInstanceRequest,
    ) -> Result<DeleteOutcome, bidfleet_core::ErrorResponse> {
        info!(
            tenant_id = %request.tenant_id,
            instance = %request.name,
            zone = %request.zone,
            "Received delete instance request"
        );

        self.service
            .delete_instance(request)
            .await
            .map_err(|e| e.into())
    }

    /// Handle get instance request
    pub async fn get_instance(
        &self,
        request: GetInstanceRequest,
    ) -> Result<ResourceSnapshot, bidfleet_core::ErrorResponse> {
        info!(instance = %request.name, zone = %request.zone, "Received get instance request");

        self.service.get_instance(request).await.map_err(|e| e.into())
    }
}
