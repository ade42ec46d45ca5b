use prometheus::{
    opts, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Registry, TextEncoder,
};

pub struct ObservabilityRepository {
    registry: Registry,
    notifications_total: CounterVec,
    notification_failures_total: CounterVec,
    operation_latency_seconds: HistogramVec,
    operation_failures_total: CounterVec,
    lifecycle_requests_total: CounterVec,
    api_request_total: CounterVec,
    api_request_latency_seconds: HistogramVec,
    tenant_config_version: Gauge,
}

impl ObservabilityRepository {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();

        let notifications_total = CounterVec::new(
            opts!(
                "bidfleet_lifecycle_notifications_total",
                "Lifecycle notifications published, by state"
            ),
            &["topic", "state"],
        )
        .map_err(|e| e.to_string())?;
        let notification_failures_total = CounterVec::new(
            opts!(
                "bidfleet_lifecycle_notification_failures_total",
                "Lifecycle notifications the publisher rejected"
            ),
            &["topic"],
        )
        .map_err(|e| e.to_string())?;
        let operation_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "bidfleet_backend_operation_latency_seconds",
                "Time from operation submit to terminal state (seconds)",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["kind"],
        )
        .map_err(|e| e.to_string())?;
        let operation_failures_total = CounterVec::new(
            opts!(
                "bidfleet_backend_operation_failures_total",
                "Backend operations that ended in a typed failure"
            ),
            &["kind", "class"],
        )
        .map_err(|e| e.to_string())?;
        let lifecycle_requests_total = CounterVec::new(
            opts!(
                "bidfleet_lifecycle_requests_total",
                "Create and delete requests by outcome"
            ),
            &["action", "outcome"],
        )
        .map_err(|e| e.to_string())?;
        let api_request_total = CounterVec::new(
            opts!(
                "bidfleet_api_request_total",
                "Control plane API request total"
            ),
            &["endpoint", "status"],
        )
        .map_err(|e| e.to_string())?;
        let api_request_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "bidfleet_api_request_latency_seconds",
                "Control plane API request latency (seconds)",
            ),
            &["endpoint"],
        )
        .map_err(|e| e.to_string())?;
        let tenant_config_version = Gauge::with_opts(opts!(
            "bidfleet_tenant_config_version",
            "Version of the tenant configuration snapshot in use"
        ))
        .map_err(|e| e.to_string())?;

        registry
            .register(Box::new(notifications_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(notification_failures_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(operation_failures_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(lifecycle_requests_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(api_request_total.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(api_request_latency_seconds.clone()))
            .map_err(|e| e.to_string())?;
        registry
            .register(Box::new(tenant_config_version.clone()))
            .map_err(|e| e.to_string())?;

        Ok(Self {
            registry,
            notifications_total,
            notification_failures_total,
            operation_latency_seconds,
            operation_failures_total,
            lifecycle_requests_total,
            api_request_total,
            api_request_latency_seconds,
            tenant_config_version,
        })
    }

    pub fn inc_notification(&self, topic: &str, state: &str) {
        self.notifications_total
            .with_label_values(&[topic, state])
            .inc();
    }

    pub fn inc_notification_failure(&self, topic: &str) {
        self.notification_failures_total
            .with_label_values(&[topic])
            .inc();
    }

    pub fn observe_operation_latency(&self, kind: &str, seconds: f64) {
        self.operation_latency_seconds
            .with_label_values(&[kind])
            .observe(seconds);
    }

    pub fn inc_operation_failure(&self, kind: &str, class: &str) {
        self.operation_failures_total
            .with_label_values(&[kind, class])
            .inc();
    }

    pub fn inc_lifecycle_request(&self, action: &str, outcome: &str) {
        self.lifecycle_requests_total
            .with_label_values(&[action, outcome])
            .inc();
    }

    pub fn observe_api_request(&self, endpoint: &str, status: &str, seconds: f64) {
        self.api_request_total
            .with_label_values(&[endpoint, status])
            .inc();
        self.api_request_latency_seconds
            .with_label_values(&[endpoint])
            .observe(seconds);
    }

    pub fn set_tenant_config_version(&self, version: u64) {
        self.tenant_config_version.set(version as f64);
    }

    pub fn render_metrics(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| e.to_string())?;
        String::from_utf8(buffer).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_labelled_series() {
        let repo = ObservabilityRepository::new().unwrap();
        repo.inc_notification("bidder-instances", "RUNNING");
        repo.observe_operation_latency("insert_disk", 0.2);
        repo.inc_operation_failure("insert_instance", "quota_exceeded");

        let rendered = repo.render_metrics().unwrap();
        assert!(rendered.contains("bidfleet_lifecycle_notifications_total"));
        assert!(rendered.contains("state=\"RUNNING\""));
        assert!(rendered.contains("bidfleet_backend_operation_latency_seconds"));
        assert!(rendered.contains("class=\"quota_exceeded\""));
    }

    #[test]
    fn test_tenant_config_version_gauge() {
        let repo = ObservabilityRepository::new().unwrap();
        repo.set_tenant_config_version(7);
        let rendered = repo.render_metrics().unwrap();
        assert!(rendered.contains("bidfleet_tenant_config_version 7"));
    }
}
