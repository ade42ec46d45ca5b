use crate::features::observability::repo::ObservabilityRepository;
use crate::features::observability::service::ObservabilityService;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bidfleet_core::{InstanceState, OperationKind};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub struct ObservabilityController {
    service: ObservabilityService,
}

impl ObservabilityController {
    pub fn new(service: ObservabilityService) -> Self {
        Self { service }
    }

    pub fn record_notification(&self, topic: &str, state: InstanceState) {
        self.service.record_notification(topic, state);
    }

    pub fn record_notification_failure(&self, topic: &str) {
        self.service.record_notification_failure(topic);
    }

    pub fn record_operation_latency(&self, kind: OperationKind, elapsed: Duration) {
        self.service.record_operation_latency(kind, elapsed);
    }

    pub fn record_operation_failure(&self, kind: OperationKind, class: &str) {
        self.service.record_operation_failure(kind, class);
    }

    pub fn record_lifecycle_request(&self, action: &str, outcome: &str) {
        self.service.record_lifecycle_request(action, outcome);
    }

    pub fn record_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.service.record_api_request(endpoint, status, seconds);
    }

    pub fn set_tenant_config_version(&self, version: u64) {
        self.service.set_tenant_config_version(version);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.service.render_metrics()
    }
}

static GLOBAL_OBSERVABILITY: OnceLock<Arc<ObservabilityController>> = OnceLock::new();

pub fn global_observability_controller() -> Arc<ObservabilityController> {
    GLOBAL_OBSERVABILITY
        .get_or_init(|| {
            let repo = Arc::new(ObservabilityRepository::new().expect("metrics init"));
            Arc::new(ObservabilityController::new(ObservabilityService::new(
                repo,
            )))
        })
        .clone()
}

/// `/metrics` in Prometheus text format plus a `/healthz` liveness probe.
pub fn metrics_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
}

async fn metrics_handler() -> impl IntoResponse {
    match global_observability_controller().render_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(error) => (StatusCode::INTERNAL_SERVER_ERROR, error).into_response(),
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}
