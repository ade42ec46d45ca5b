use bidfleet_control_plane::features::compute::repo::InMemoryComputeBackend;
use bidfleet_control_plane::features::instance_lifecycle::controller::InstanceLifecycleController;
use bidfleet_control_plane::features::instance_lifecycle::service::InstanceLifecycleService;
use bidfleet_control_plane::features::instance_spec::service::InstanceSpecBuilder;
use bidfleet_control_plane::features::notifications::repo::InMemoryNotificationPublisher;
use bidfleet_control_plane::features::observability::controller::metrics_router;
use bidfleet_control_plane::features::tenant_config::controller::TenantConfigRefreshController;
use bidfleet_control_plane::features::tenant_config::repo::{
    FileTenantConfigSource, TenantConfigStore,
};
use bidfleet_control_plane::features::tenant_config::service::TenantConfigRefresher;
use bidfleet_control_plane::server::LifecycleServer;
use bidfleet_control_plane::ControlPlaneConfig;
use bidfleet_proto::v1::instance_lifecycle_service_server::InstanceLifecycleServiceServer;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bidfleet_control_plane=info,info")),
        )
        .init();

    let config = ControlPlaneConfig::from_env()?;

    info!("Starting Bidfleet Control Plane");

    // An oversized bootstrap script is a startup failure, not a per-request one.
    let spec_builder = InstanceSpecBuilder::new(config.platform_config()?)?;

    let tenants = Arc::new(TenantConfigStore::empty());
    if let Some(path) = &config.tenant_config_path {
        let refresher = Arc::new(TenantConfigRefresher::new(
            tenants.clone(),
            Arc::new(FileTenantConfigSource::new(path)),
        ));
        let refresh_controller = Arc::new(TenantConfigRefreshController::new(
            refresher,
            config.tenant_refresh_interval,
        ));

        let version = refresh_controller
            .refresh_now()
            .await
            .map_err(|e| format!("{}: {}", e.error_code, e.message))?;
        info!(path = %path.display(), version, "Loaded tenant configuration");

        refresh_controller.spawn_periodic_refresh();
    } else {
        warn!("TENANT_CONFIG_PATH is not set; every create will be rejected for an unknown tenant");
    }

    let service = InstanceLifecycleService::new(
        Arc::new(InMemoryComputeBackend::new()),
        Arc::new(InMemoryNotificationPublisher::new()),
        tenants,
        spec_builder,
        config.lifecycle.clone(),
    );
    let controller = Arc::new(InstanceLifecycleController::new(Arc::new(service)));

    let metrics_listener = tokio::net::TcpListener::bind(config.metrics_addr).await?;
    let metrics_addr = config.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, metrics_router()).await {
            error!(error = %e, "Metrics server stopped");
        }
    });
    info!(%metrics_addr, "Serving /metrics and /healthz");

    let control_plane_addr = config.control_plane_addr;
    info!(
        %control_plane_addr,
        operation_timeout_secs = config.lifecycle.operation_timeout.as_secs(),
        poll_interval_ms = config.lifecycle.poll_interval.as_millis() as u64,
        "Control Plane initialized successfully"
    );

    Server::builder()
        .add_service(InstanceLifecycleServiceServer::new(LifecycleServer::new(
            controller,
        )))
        .serve(control_plane_addr)
        .await?;

    Ok(())
}
