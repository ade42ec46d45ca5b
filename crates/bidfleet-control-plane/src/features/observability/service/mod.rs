use crate::features::observability::repo::ObservabilityRepository;
use bidfleet_core::{InstanceState, OperationKind};
use std::sync::Arc;
use std::time::Duration;

pub struct ObservabilityService {
    repo: Arc<ObservabilityRepository>,
}

impl ObservabilityService {
    pub fn new(repo: Arc<ObservabilityRepository>) -> Self {
        Self { repo }
    }

    pub fn record_notification(&self, topic: &str, state: InstanceState) {
        self.repo.inc_notification(topic, state.as_str());
    }

    pub fn record_notification_failure(&self, topic: &str) {
        self.repo.inc_notification_failure(topic);
    }

    pub fn record_operation_latency(&self, kind: OperationKind, elapsed: Duration) {
        self.repo
            .observe_operation_latency(kind.as_str(), elapsed.as_secs_f64());
    }

    pub fn record_operation_failure(&self, kind: OperationKind, class: &str) {
        self.repo.inc_operation_failure(kind.as_str(), class);
    }

    pub fn record_lifecycle_request(&self, action: &str, outcome: &str) {
        self.repo.inc_lifecycle_request(action, outcome);
    }

    pub fn record_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.repo.observe_api_request(endpoint, status, seconds);
    }

    pub fn set_tenant_config_version(&self, version: u64) {
        self.repo.set_tenant_config_version(version);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        self.repo.render_metrics()
    }
}
