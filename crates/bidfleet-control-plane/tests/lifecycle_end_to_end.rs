use bidfleet_control_plane::features::compute::repo::{BackendMethod, InMemoryComputeBackend};
use bidfleet_control_plane::features::instance_lifecycle::service::InstanceLifecycleService;
use bidfleet_control_plane::features::instance_spec::service::InstanceSpecBuilder;
use bidfleet_control_plane::features::notifications::repo::InMemoryNotificationPublisher;
use bidfleet_control_plane::features::tenant_config::repo::TenantConfigStore;
use bidfleet_control_plane::shared::types::{
    CancellationToken, CreateInstanceRequest, DeleteInstanceRequest,
};
use bidfleet_control_plane::{ControlPlaneError, LifecycleSettings};
use bidfleet_core::spec::metadata_keys;
use bidfleet_core::{
    BidderSettings, InstanceOverrides, InstanceState, PlatformConfig, ResourceKind, TenantConfig,
    MAX_BOOTSTRAP_SCRIPT_BYTES,
};
use std::sync::Arc;
use std::time::Duration;

const ZONE: &str = "rtb-us-east1-a";
const NAME: &str = "bidder-1700000000000";

struct Harness {
    backend: InMemoryComputeBackend,
    publisher: Arc<InMemoryNotificationPublisher>,
    service: InstanceLifecycleService,
}

fn tenant() -> TenantConfig {
    TenantConfig {
        tenant_id: "acme".to_string(),
        api_project_id: "acme-rtb".to_string(),
        default_image: "debian-7-wheezy-v20130522".to_string(),
        machine_types: [(ZONE.to_string(), "standard-1-cpu".to_string())]
            .into_iter()
            .collect(),
        bidder: BidderSettings {
            listen_port: 8080,
            ..BidderSettings::default()
        },
        ..TenantConfig::default()
    }
}

fn harness() -> Harness {
    let backend = InMemoryComputeBackend::new();
    let publisher = Arc::new(InMemoryNotificationPublisher::new());
    let platform = PlatformConfig {
        bootstrap_script: "#!/bin/bash\n/opt/bidder/start.sh\n".to_string(),
        ..PlatformConfig::default()
    };

    let service = InstanceLifecycleService::new(
        Arc::new(backend.clone()),
        publisher.clone(),
        Arc::new(TenantConfigStore::new(vec![tenant()])),
        InstanceSpecBuilder::new(platform).unwrap(),
        LifecycleSettings {
            poll_interval: Duration::from_millis(1),
            ..LifecycleSettings::default()
        },
    );

    Harness {
        backend,
        publisher,
        service,
    }
}

fn bidder_request(zone: &str) -> CreateInstanceRequest {
    CreateInstanceRequest {
        tenant_id: "acme".to_string(),
        kind: ResourceKind::Bidder,
        zone: zone.to_string(),
        name: Some(NAME.to_string()),
        overrides: InstanceOverrides::default(),
        requester: "ops@acme.example".to_string(),
    }
}

#[tokio::test]
async fn test_bidder_create_provisions_disk_then_instance_and_reports_running() {
    let h = harness();
    let mut events = h
        .publisher
        .subscribe(ResourceKind::Bidder.topic())
        .unwrap();

    let outcome = h
        .service
        .create_instance(bidder_request(ZONE), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.name, NAME);
    assert_eq!(outcome.state, InstanceState::Running);
    assert!(!outcome.cancelled);
    assert!(outcome.disk_name.starts_with("disk-rtb-us-east1-a-"));
    assert_eq!(h.backend.disk_names(), vec![outcome.disk_name.clone()]);

    let methods = h.backend.call_methods();
    let disk_at = methods
        .iter()
        .position(|m| *m == BackendMethod::CreateDisk)
        .unwrap();
    let instance_at = methods
        .iter()
        .position(|m| *m == BackendMethod::CreateInstance)
        .unwrap();
    assert!(disk_at < instance_at);

    let instance = h.backend.instance(ZONE, NAME).unwrap();
    assert!(instance.tags.contains("bidder"));
    assert_eq!(instance.machine_type, "standard-1-cpu");
    assert_eq!(
        instance.metadata.get(metadata_keys::LISTEN_PORT).map(String::as_str),
        Some("8080")
    );
    assert!(instance
        .metadata
        .get(metadata_keys::STARTUP_SCRIPT)
        .unwrap()
        .contains("/opt/bidder/start.sh"));

    assert_eq!(
        h.publisher.states_for(ZONE, NAME),
        vec![InstanceState::Starting, InstanceState::Running]
    );

    let first = events.recv().await.unwrap();
    assert_eq!(first.tenant_id, "acme");
    assert_eq!(first.state(), InstanceState::Starting);
    assert_eq!(events.recv().await.unwrap().state(), InstanceState::Running);
}

#[tokio::test]
async fn test_create_then_delete_publishes_full_lifecycle() {
    let h = harness();

    h.service
        .create_instance(bidder_request(ZONE), &CancellationToken::new())
        .await
        .unwrap();
    let outcome = h
        .service
        .delete_instance(DeleteInstanceRequest {
            tenant_id: "acme".to_string(),
            kind: ResourceKind::Bidder,
            zone: ZONE.to_string(),
            name: NAME.to_string(),
        })
        .await
        .unwrap();

    assert!(!outcome.already_absent);
    assert!(h.backend.instance(ZONE, NAME).is_none());
    assert_eq!(
        h.publisher.states_for(ZONE, NAME),
        vec![
            InstanceState::Starting,
            InstanceState::Running,
            InstanceState::Stopping,
            InstanceState::Terminated,
        ]
    );
}

#[tokio::test]
async fn test_zone_without_machine_type_never_reaches_backend() {
    let h = harness();

    let error = h
        .service
        .create_instance(bidder_request("rtb-europe-west1-b"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(error, ControlPlaneError::ValidationError(_)));
    assert!(h.backend.calls().is_empty());
    assert!(h.publisher.history().is_empty());
}

#[test]
fn test_oversized_bootstrap_script_is_rejected_before_any_request() {
    let platform = PlatformConfig {
        bootstrap_script: "x".repeat(MAX_BOOTSTRAP_SCRIPT_BYTES + 1),
        ..PlatformConfig::default()
    };

    assert!(InstanceSpecBuilder::new(platform).is_err());
}
