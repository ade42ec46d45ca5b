use crate::features::instance_lifecycle::controller::InstanceLifecycleController;
use crate::features::observability::controller::global_observability_controller;
use crate::shared::types::{
    CancellationToken, CreateInstanceRequest, DeleteInstanceRequest, GetInstanceRequest,
};
use bidfleet_core::{ErrorResponse, InstanceOverrides};
use bidfleet_proto::conversion::resource_kind_from_wire;
use bidfleet_proto::v1::instance_lifecycle_service_server::InstanceLifecycleService;
use bidfleet_proto::v1::{
    CreateInstanceResponse, DeleteInstanceResponse, GetInstanceResponse, InstanceState,
};
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};

pub struct LifecycleServer {
    controller: Arc<InstanceLifecycleController>,
}

impl LifecycleServer {
    pub fn new(controller: Arc<InstanceLifecycleController>) -> Self {
        Self { controller }
    }
}

/// Cancels the in-flight create when the RPC future is dropped.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

fn status_from_response(error: ErrorResponse) -> Status {
    match error.error_code.as_str() {
        "VALIDATION_ERROR" => Status::invalid_argument(error.message),
        "RESOURCE_NOT_FOUND" => Status::not_found(error.message),
        "CONFLICT" => Status::aborted(error.message),
        "DEADLINE_EXCEEDED" => Status::deadline_exceeded(error.message),
        _ => Status::internal(error.message),
    }
}

fn record<T>(endpoint: &str, started: Instant, result: &Result<T, Status>) {
    let status = match result {
        Ok(_) => "ok".to_string(),
        Err(status) => format!("{:?}", status.code()),
    };
    global_observability_controller().record_api_request(
        endpoint,
        &status,
        started.elapsed().as_secs_f64(),
    );
}

#[tonic::async_trait]
impl InstanceLifecycleService for LifecycleServer {
    async fn create_instance(
        &self,
        request: Request<bidfleet_proto::v1::CreateInstanceRequest>,
    ) -> Result<Response<CreateInstanceResponse>, Status> {
        let started = Instant::now();
        let result: Result<Response<CreateInstanceResponse>, Status> = async {
            let req = request.into_inner();
            let overrides = req
                .overrides
                .map(InstanceOverrides::try_from)
                .transpose()
                .map_err(Status::invalid_argument)?
                .unwrap_or_default();
            let create = CreateInstanceRequest {
                tenant_id: req.tenant_id,
                kind: resource_kind_from_wire(req.kind).map_err(Status::invalid_argument)?,
                zone: req.zone,
                name: req.name.filter(|name| !name.is_empty()),
                overrides,
                requester: req.requester,
            };

            // Detached; a dropped call cancels it at the next poll.
            let cancel = CancellationToken::new();
            let _guard = CancelOnDrop(cancel.clone());
            let controller = self.controller.clone();
            let outcome = tokio::spawn(async move {
                controller.create_instance(create, &cancel).await
            })
            .await
            .map_err(|e| Status::internal(format!("create task failed: {}", e)))?
            .map_err(status_from_response)?;

            Ok(Response::new(CreateInstanceResponse {
                name: outcome.name,
                zone: outcome.zone,
                disk_name: outcome.disk_name,
                state: InstanceState::from(outcome.state) as i32,
                cancelled: outcome.cancelled,
            }))
        }
        .await;

        record("CreateInstance", started, &result);
        result
    }

    async fn delete_instance(
        &self,
        request: Request<bidfleet_proto::v1::DeleteInstanceRequest>,
    ) -> Result<Response<DeleteInstanceResponse>, Status> {
        let started = Instant::now();
        let result: Result<Response<DeleteInstanceResponse>, Status> = async {
            let req = request.into_inner();
            let outcome = self
                .controller
                .delete_instance(DeleteInstanceRequest {
                    tenant_id: req.tenant_id,
                    kind: resource_kind_from_wire(req.kind).map_err(Status::invalid_argument)?,
                    zone: req.zone,
                    name: req.name,
                })
                .await
                .map_err(status_from_response)?;

            Ok(Response::new(DeleteInstanceResponse {
                name: outcome.name,
                zone: outcome.zone,
                already_absent: outcome.already_absent,
            }))
        }
        .await;

        record("DeleteInstance", started, &result);
        result
    }

    async fn get_instance(
        &self,
        request: Request<bidfleet_proto::v1::GetInstanceRequest>,
    ) -> Result<Response<GetInstanceResponse>, Status> {
        let started = Instant::now();
        let result: Result<Response<GetInstanceResponse>, Status> = async {
            let req = request.into_inner();
            let snapshot = self
                .controller
                .get_instance(GetInstanceRequest {
                    tenant_id: req.tenant_id,
                    kind: resource_kind_from_wire(req.kind).map_err(Status::invalid_argument)?,
                    zone: req.zone,
                    name: req.name,
                })
                .await
                .map_err(status_from_response)?;

            Ok(Response::new(GetInstanceResponse {
                instance: Some(snapshot.into()),
            }))
        }
        .await;

        record("GetInstance", started, &result);
        result
    }
}
