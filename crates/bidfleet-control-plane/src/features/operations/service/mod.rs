use crate::features::compute::repo::ComputeBackend;
use crate::features::observability::controller::global_observability_controller;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use bidfleet_core::compute::error_codes;
use bidfleet_core::Operation;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tracing::{debug, warn};

/// Drives an operation handle to a terminal state. The interval between
/// status checks belongs to the backend's `wait_operation`.
#[derive(Clone)]
pub struct OperationWaiter {
    backend: Arc<dyn ComputeBackend>,
}

impl OperationWaiter {
    pub fn new(backend: Arc<dyn ComputeBackend>) -> Self {
        Self { backend }
    }

    /// Returns the completed operation or a typed error; never a pending handle.
    pub async fn wait(
        &self,
        operation: Operation,
        timeout: Duration,
    ) -> ControlPlaneResult<Operation> {
        let kind = operation.kind;
        let target = operation.target_link.clone();
        let started = Instant::now();

        let result = match time::timeout(timeout, self.poll_until_done(operation)).await {
            Ok(result) => result,
            Err(_) => Err(ControlPlaneError::Timeout(format!(
                "{} on {} did not complete within {:?}",
                kind.as_str(),
                target,
                timeout
            ))),
        };

        let metrics = global_observability_controller();
        metrics.record_operation_latency(kind, started.elapsed());

        match &result {
            Ok(_) => {
                debug!(operation = kind.as_str(), target = %target, "Operation completed");
            }
            Err(error) => {
                metrics.record_operation_failure(kind, error.class());
                warn!(
                    operation = kind.as_str(),
                    target = %target,
                    error = %error,
                    "Operation failed"
                );
            }
        }

        result
    }

    async fn poll_until_done(&self, mut operation: Operation) -> ControlPlaneResult<Operation> {
        loop {
            if operation.is_done() {
                return classify(operation);
            }
            operation = self.backend.wait_operation(&operation).await?;
        }
    }
}

/// Maps a terminal operation onto the error taxonomy.
pub fn classify(operation: Operation) -> ControlPlaneResult<Operation> {
    let Some(error) = operation.error.clone() else {
        return Ok(operation);
    };

    Err(match error.code.as_str() {
        error_codes::RESOURCE_NOT_FOUND => ControlPlaneError::not_found(operation.target_link),
        error_codes::QUOTA_EXCEEDED => ControlPlaneError::QuotaExceeded(error.message),
        code => ControlPlaneError::Unknown(format!("{}: {}", code, error.message)),
    })
}
