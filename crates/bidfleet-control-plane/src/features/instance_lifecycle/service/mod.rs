use crate::features::compute::repo::ComputeBackend;
use crate::features::disk_provisioning::service::DiskProvisioner;
use crate::features::instance_spec::service::{InstanceSpecBuilder, SpecRequest};
use crate::features::notifications::repo::NotificationPublisher;
use crate::features::notifications::service::LifecycleNotifier;
use crate::features::observability::controller::global_observability_controller;
use crate::features::operations::service::OperationWaiter;
use crate::features::tenant_config::repo::TenantConfigProvider;
use crate::shared::config::LifecycleSettings;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use crate::shared::types::{
    CancellationToken, CreateInstanceRequest, CreateOutcome, DeleteInstanceRequest,
    DeleteOutcome, GetInstanceRequest,
};
use bidfleet_core::{
    instance_link, is_running_status, InstanceSpec, InstanceState, ResourceSnapshot,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::time;
use tracing::{error, info, warn};

const MAX_NAME_LEN: usize = 63;

enum PollOutcome {
    Running,
    Cancelled,
}

/// Drives instances through create and delete, publishing every observed
/// transition. One call handles one instance; calls for different instances
/// may run concurrently.
pub struct InstanceLifecycleService {
    backend: Arc<dyn ComputeBackend>,
    publisher: Arc<dyn NotificationPublisher>,
    tenants: Arc<dyn TenantConfigProvider>,
    spec_builder: InstanceSpecBuilder,
    disks: DiskProvisioner,
    waiter: OperationWaiter,
    settings: LifecycleSettings,
}

impl InstanceLifecycleService {
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        publisher: Arc<dyn NotificationPublisher>,
        tenants: Arc<dyn TenantConfigProvider>,
        spec_builder: InstanceSpecBuilder,
        settings: LifecycleSettings,
    ) -> Self {
        let waiter = OperationWaiter::new(backend.clone());
        let disks = DiskProvisioner::new(backend.clone(), waiter.clone(), settings.disk_timeout);

        Self {
            backend,
            publisher,
            tenants,
            spec_builder,
            disks,
            waiter,
            settings,
        }
    }

    /// BUILDING -> DISK_PROVISIONING -> STARTING -> RUNNING | ERROR.
    ///
    /// Returns once the instance reports RUNNING or `cancel` fires. A
    /// cancelled create keeps whatever was already created.
    pub async fn create_instance(
        &self,
        request: CreateInstanceRequest,
        cancel: &CancellationToken,
    ) -> ControlPlaneResult<CreateOutcome> {
        let result = self.run_create(request, cancel).await;

        let outcome = match &result {
            Ok(outcome) if outcome.cancelled => "cancelled",
            Ok(_) => "ok",
            Err(error) => error.class(),
        };
        global_observability_controller().record_lifecycle_request("create", outcome);

        result
    }

    /// STOPPING -> TERMINATED, or TERMINATED alone when the instance is absent.
    pub async fn delete_instance(
        &self,
        request: DeleteInstanceRequest,
    ) -> ControlPlaneResult<DeleteOutcome> {
        let result = self.run_delete(request).await;

        let outcome = match &result {
            Ok(outcome) if outcome.already_absent => "absent",
            Ok(_) => "ok",
            Err(error) => error.class(),
        };
        global_observability_controller().record_lifecycle_request("delete", outcome);

        result
    }

    pub async fn get_instance(
        &self,
        request: GetInstanceRequest,
    ) -> ControlPlaneResult<ResourceSnapshot> {
        validate_target(&request.tenant_id, &request.zone)?;
        validate_instance_name(&request.name)?;

        let instance = self
            .backend
            .get_instance(&request.zone, &request.name)
            .await?;
        let kind = instance.kind().unwrap_or(request.kind);
        Ok(ResourceSnapshot::observed(kind, &instance))
    }

    async fn run_create(
        &self,
        request: CreateInstanceRequest,
        cancel: &CancellationToken,
    ) -> ControlPlaneResult<CreateOutcome> {
        validate_target(&request.tenant_id, &request.zone)?;
        if let Some(name) = &request.name {
            validate_instance_name(name)?;
        }

        let tenant = self
            .tenants
            .tenant(&request.tenant_id)
            .await?
            .ok_or_else(|| {
                ControlPlaneError::ValidationError(format!("Unknown tenant {}", request.tenant_id))
            })?;

        let requested_at = Utc::now();
        let created_at_millis = requested_at.timestamp_millis();
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| request.kind.generated_name(created_at_millis));

        let spec = self.spec_builder.build(&SpecRequest {
            kind: request.kind,
            tenant: &tenant,
            zone: &request.zone,
            name: &name,
            overrides: &request.overrides,
            requester: &request.requester,
            requested_at,
        })?;

        info!(
            tenant_id = %request.tenant_id,
            kind = %request.kind,
            instance = %spec.name,
            zone = %spec.zone,
            "Creating instance"
        );

        let mut notifier = LifecycleNotifier::new(
            self.publisher.clone(),
            request.tenant_id.clone(),
            request.kind,
            spec.zone.clone(),
            spec.name.clone(),
        );

        let disk = match self.disks.provision(spec.disk_spec(created_at_millis)).await {
            Ok(disk) => disk,
            Err(err) => {
                error!(instance = %spec.name, zone = %spec.zone, error = %err, "Boot disk provisioning failed");
                notifier.announce(InstanceState::Error).await;
                return Err(err);
            }
        };
        let disk_name = disk.name.clone();
        let spec = spec.with_boot_disk(disk);

        let operation = match self.backend.create_instance(&spec).await {
            Ok(operation) => operation,
            Err(err) => {
                return Err(self
                    .fail_create(&mut notifier, &spec, &disk_name, err)
                    .await)
            }
        };
        notifier.announce(InstanceState::Starting).await;

        if let Err(err) = self
            .waiter
            .wait(operation, self.settings.operation_timeout)
            .await
        {
            return Err(self
                .fail_create(&mut notifier, &spec, &disk_name, err)
                .await);
        }

        match self.poll_until_running(&spec, &mut notifier, cancel).await {
            Ok(PollOutcome::Running) => {
                info!(instance = %spec.name, zone = %spec.zone, "Instance running");
                Ok(CreateOutcome {
                    name: spec.name,
                    zone: spec.zone,
                    disk_name,
                    state: InstanceState::Running,
                    cancelled: false,
                })
            }
            Ok(PollOutcome::Cancelled) => {
                info!(instance = %spec.name, zone = %spec.zone, "Stopped watching instance on request");
                Ok(CreateOutcome {
                    state: notifier.last_state().unwrap_or(InstanceState::Starting),
                    name: spec.name,
                    zone: spec.zone,
                    disk_name,
                    cancelled: true,
                })
            }
            Err(err) => {
                error!(instance = %spec.name, zone = %spec.zone, error = %err, "Instance failed to start");
                notifier.announce(InstanceState::Error).await;
                Err(err)
            }
        }
    }

    /// Publishes ERROR and releases the boot disk that no instance took.
    async fn fail_create(
        &self,
        notifier: &mut LifecycleNotifier,
        spec: &InstanceSpec,
        disk_name: &str,
        err: ControlPlaneError,
    ) -> ControlPlaneError {
        error!(instance = %spec.name, zone = %spec.zone, error = %err, "Instance creation failed");
        notifier.announce(InstanceState::Error).await;

        if self.settings.cleanup_orphaned_disks {
            if let Err(cleanup) = self.disks.release(&spec.zone, disk_name).await {
                warn!(
                    disk = %disk_name,
                    zone = %spec.zone,
                    error = %cleanup,
                    "Failed to delete orphaned boot disk"
                );
            }
        } else {
            warn!(disk = %disk_name, zone = %spec.zone, "Leaving orphaned boot disk in place");
        }

        err
    }

    async fn poll_until_running(
        &self,
        spec: &InstanceSpec,
        notifier: &mut LifecycleNotifier,
        cancel: &CancellationToken,
    ) -> ControlPlaneResult<PollOutcome> {
        let link = instance_link(&spec.zone, &spec.name);
        let mut missing_since: Option<time::Instant> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(PollOutcome::Cancelled);
            }

            match self.backend.get_instance(&spec.zone, &spec.name).await {
                Ok(instance) => {
                    missing_since = None;
                    match instance.state() {
                        InstanceState::Starting | InstanceState::Running => {
                            notifier.observe(&instance).await;
                        }
                        _ => {
                            return Err(ControlPlaneError::Unknown(format!(
                                "Instance {} reported status {} while starting",
                                spec.name, instance.status
                            )));
                        }
                    }
                    if is_running_status(&instance.status) {
                        return Ok(PollOutcome::Running);
                    }
                }
                // Reads can lag the create operation, but only for up to
                // `operation_timeout` of consecutive misses.
                Err(err) if err.is_not_found_for(&link) => {
                    let since = *missing_since.get_or_insert_with(time::Instant::now);
                    if since.elapsed() >= self.settings.operation_timeout {
                        warn!(
                            instance = %spec.name,
                            zone = %spec.zone,
                            missing_for_ms = since.elapsed().as_millis() as u64,
                            "Instance never became visible"
                        );
                        return Err(err);
                    }
                    warn!(instance = %spec.name, zone = %spec.zone, "Instance not visible yet");
                }
                Err(err) => return Err(err),
            }

            tokio::select! {
                _ = time::sleep(self.settings.poll_interval) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    async fn run_delete(&self, request: DeleteInstanceRequest) -> ControlPlaneResult<DeleteOutcome> {
        validate_target(&request.tenant_id, &request.zone)?;
        validate_instance_name(&request.name)?;

        let link = instance_link(&request.zone, &request.name);
        let mut notifier = LifecycleNotifier::new(
            self.publisher.clone(),
            request.tenant_id.clone(),
            request.kind,
            request.zone.clone(),
            request.name.clone(),
        );

        let instance = match self
            .backend
            .get_instance(&request.zone, &request.name)
            .await
        {
            Ok(instance) => instance,
            Err(err) if err.is_not_found_for(&link) => {
                info!(instance = %request.name, zone = %request.zone, "Instance already absent");
                notifier.announce(InstanceState::Terminated).await;
                return Ok(DeleteOutcome {
                    name: request.name,
                    zone: request.zone,
                    already_absent: true,
                });
            }
            Err(err) => {
                error!(instance = %request.name, zone = %request.zone, error = %err, "Failed to read instance for delete");
                notifier.announce(InstanceState::Error).await;
                return Err(err);
            }
        };

        info!(instance = %request.name, zone = %request.zone, status = %instance.status, "Deleting instance");
        notifier
            .publish(
                ResourceSnapshot::observed(request.kind, &instance)
                    .with_state(InstanceState::Stopping),
            )
            .await;

        let deleted = match self
            .backend
            .delete_instance(&request.zone, &request.name)
            .await
        {
            Ok(operation) => self
                .waiter
                .wait(operation, self.settings.operation_timeout)
                .await
                .map(|_| ()),
            Err(err) => Err(err),
        };

        let vanished = match deleted {
            Ok(()) => false,
            Err(err) if err.is_not_found_for(&link) => {
                warn!(instance = %request.name, zone = %request.zone, "Instance vanished during delete");
                true
            }
            Err(err) => {
                error!(instance = %request.name, zone = %request.zone, error = %err, "Instance delete failed");
                notifier.announce(InstanceState::Error).await;
                return Err(err);
            }
        };

        notifier.announce(InstanceState::Terminated).await;
        Ok(DeleteOutcome {
            name: request.name,
            zone: request.zone,
            already_absent: vanished,
        })
    }
}

fn validate_target(tenant_id: &str, zone: &str) -> ControlPlaneResult<()> {
    if tenant_id.trim().is_empty() {
        return Err(ControlPlaneError::ValidationError(
            "Tenant ID cannot be empty".to_string(),
        ));
    }

    let zone_ok = !zone.is_empty()
        && zone
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !zone_ok {
        return Err(ControlPlaneError::ValidationError(format!(
            "Invalid zone: {:?}",
            zone
        )));
    }

    Ok(())
}

/// Lowercase letters, digits and dashes; starts with a letter, does not end
/// with a dash, at most 63 characters.
pub fn validate_instance_name(name: &str) -> ControlPlaneResult<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if valid {
        Ok(())
    } else {
        Err(ControlPlaneError::ValidationError(format!(
            "Invalid instance name: {:?}",
            name
        )))
    }
}
