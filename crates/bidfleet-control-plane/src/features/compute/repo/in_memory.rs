use super::ComputeBackend;
use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use async_trait::async_trait;
use bidfleet_core::compute::error_codes;
use bidfleet_core::{
    disk_link, instance_link, Disk, DiskSpec, Instance, InstanceSpec, Operation, OperationError,
    OperationKind, OperationStatus,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::Duration;

/// Raw statuses a new instance reports on successive reads.
pub const DEFAULT_STATUS_SCRIPT: [&str; 3] = ["PROVISIONING", "STAGING", "RUNNING"];
const CALL_LOG_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendMethod {
    CreateDisk,
    GetDisk,
    DeleteDisk,
    CreateInstance,
    GetInstance,
    DeleteInstance,
    WaitOperation,
}

/// One entry of the call log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCall {
    pub method: BackendMethod,
    pub zone: String,
    pub name: String,
}

enum Effect {
    InsertDisk(Disk),
    RemoveDisk(String),
    InsertInstance(Box<SimulatedInstance>),
    RemoveInstance(String),
}

struct PendingOperation {
    operation: Operation,
    polls_remaining: u32,
    outcome: Option<OperationError>,
    effect: Option<Effect>,
}

struct SimulatedInstance {
    instance: Instance,
    upcoming: VecDeque<String>,
    hidden_reads: u32,
}

struct BackendState {
    disks: HashMap<String, Disk>,
    instances: HashMap<String, SimulatedInstance>,
    operations: HashMap<String, PendingOperation>,
    calls: VecDeque<BackendCall>,
    call_log_limit: usize,
    call_failures: HashMap<BackendMethod, VecDeque<ControlPlaneError>>,
    operation_failures: HashMap<OperationKind, VecDeque<OperationError>>,
    stalled: HashSet<OperationKind>,
    status_script: Vec<String>,
    polls_per_operation: u32,
    instance_quota: Option<usize>,
    visibility_lag: u32,
    next_address: u32,
}

impl BackendState {
    fn new() -> Self {
        Self {
            disks: HashMap::new(),
            instances: HashMap::new(),
            operations: HashMap::new(),
            calls: VecDeque::new(),
            call_log_limit: CALL_LOG_LIMIT,
            call_failures: HashMap::new(),
            operation_failures: HashMap::new(),
            stalled: HashSet::new(),
            status_script: DEFAULT_STATUS_SCRIPT.iter().map(ToString::to_string).collect(),
            polls_per_operation: 1,
            instance_quota: None,
            visibility_lag: 0,
            next_address: 2,
        }
    }

    fn record(
        &mut self,
        method: BackendMethod,
        zone: &str,
        name: &str,
    ) -> ControlPlaneResult<()> {
        self.calls.push_back(BackendCall {
            method,
            zone: zone.to_string(),
            name: name.to_string(),
        });
        while self.calls.len() > self.call_log_limit {
            self.calls.pop_front();
        }

        match self
            .call_failures
            .get_mut(&method)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn submit(&mut self, operation: Operation, effect: Option<Effect>) -> Operation {
        let outcome = self
            .operation_failures
            .get_mut(&operation.kind)
            .and_then(VecDeque::pop_front);
        self.submit_with_outcome(operation, effect, outcome)
    }

    fn submit_with_outcome(
        &mut self,
        operation: Operation,
        effect: Option<Effect>,
        outcome: Option<OperationError>,
    ) -> Operation {
        self.operations.insert(
            operation.id.clone(),
            PendingOperation {
                operation: operation.clone(),
                polls_remaining: self.polls_per_operation.max(1),
                outcome,
                effect,
            },
        );
        operation
    }

    fn pending_instance_inserts(&self) -> usize {
        self.operations
            .values()
            .filter(|pending| matches!(pending.effect, Some(Effect::InsertInstance(_))))
            .count()
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::InsertDisk(disk) => {
                self.disks.insert(disk.self_link.clone(), disk);
            }
            Effect::RemoveDisk(link) => {
                self.disks.remove(&link);
            }
            Effect::InsertInstance(simulated) => {
                self.instances
                    .insert(simulated.instance.self_link.clone(), *simulated);
            }
            Effect::RemoveInstance(link) => {
                self.instances.remove(&link);
            }
        }
    }
}

fn copy_disk(disk: &Disk) -> Disk {
    Disk {
        name: disk.name.clone(),
        zone: disk.zone.clone(),
        self_link: disk.self_link.clone(),
        source_image: disk.source_image.clone(),
        status: disk.status.clone(),
    }
}

fn last_segment(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

/// Simulated compute backend. Operations complete after a configurable number
/// of waits; new instances walk through a scripted list of raw statuses.
#[derive(Clone)]
pub struct InMemoryComputeBackend {
    state: Arc<RwLock<BackendState>>,
    wait_latency: Duration,
}

impl InMemoryComputeBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(BackendState::new())),
            wait_latency: Duration::ZERO,
        }
    }

    /// Each `wait_operation` call sleeps this long before answering.
    pub fn with_wait_latency(mut self, latency: Duration) -> Self {
        self.wait_latency = latency;
        self
    }

    fn lock(&self) -> ControlPlaneResult<RwLockWriteGuard<'_, BackendState>> {
        self.state
            .write()
            .map_err(|_| ControlPlaneError::Unknown("Lock poisoned".to_string()))
    }

    fn configure<F: FnOnce(&mut BackendState)>(&self, f: F) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state);
    }

    fn inspect<T, F: FnOnce(&BackendState) -> T>(&self, f: F) -> T {
        let state = self
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&state)
    }

    pub fn set_status_script(&self, statuses: &[&str]) {
        let script = statuses.iter().map(ToString::to_string).collect();
        self.configure(|state| state.status_script = script);
    }

    pub fn set_polls_per_operation(&self, polls: u32) {
        self.configure(|state| state.polls_per_operation = polls.max(1));
    }

    /// Maximum number of instances, pending inserts included.
    pub fn set_instance_quota(&self, quota: usize) {
        self.configure(|state| state.instance_quota = Some(quota));
    }

    /// Only the most recent `limit` calls are kept in the call log.
    pub fn set_call_log_limit(&self, limit: usize) {
        self.configure(|state| {
            state.call_log_limit = limit;
            while state.calls.len() > limit {
                state.calls.pop_front();
            }
        });
    }

    /// New instances answer not-found to this many reads before appearing.
    pub fn set_visibility_lag(&self, reads: u32) {
        self.configure(|state| state.visibility_lag = reads);
    }

    /// The next call to `method` fails with `error` before touching state.
    pub fn fail_next_call(&self, method: BackendMethod, error: ControlPlaneError) {
        self.configure(|state| {
            state
                .call_failures
                .entry(method)
                .or_default()
                .push_back(error)
        });
    }

    /// The next operation of `kind` is accepted but completes with `error`.
    pub fn fail_next_operation(&self, kind: OperationKind, error: OperationError) {
        self.configure(|state| {
            state
                .operation_failures
                .entry(kind)
                .or_default()
                .push_back(error)
        });
    }

    /// Operations of `kind` never reach a terminal state.
    pub fn stall_operations(&self, kind: OperationKind) {
        self.configure(|state| {
            state.stalled.insert(kind);
        });
    }

    /// Seeds an existing instance, as if created outside this process.
    pub fn seed_instance(&self, instance: Instance) {
        self.configure(|state| {
            state.instances.insert(
                instance.self_link.clone(),
                SimulatedInstance {
                    instance,
                    upcoming: VecDeque::new(),
                    hidden_reads: 0,
                },
            );
        });
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.inspect(|state| state.calls.iter().cloned().collect())
    }

    pub fn call_methods(&self) -> Vec<BackendMethod> {
        self.inspect(|state| state.calls.iter().map(|call| call.method).collect())
    }

    pub fn call_count(&self, method: BackendMethod) -> usize {
        self.inspect(|state| {
            state
                .calls
                .iter()
                .filter(|call| call.method == method)
                .count()
        })
    }

    pub fn disk_names(&self) -> Vec<String> {
        self.inspect(|state| {
            let mut names: Vec<String> = state.disks.values().map(|d| d.name.clone()).collect();
            names.sort();
            names
        })
    }

    pub fn instance(&self, zone: &str, name: &str) -> Option<Instance> {
        let link = instance_link(zone, name);
        self.inspect(|state| state.instances.get(&link).map(|sim| sim.instance.clone()))
    }
}

impl Default for InMemoryComputeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComputeBackend for InMemoryComputeBackend {
    async fn create_disk(&self, spec: &DiskSpec) -> ControlPlaneResult<Operation> {
        let mut state = self.lock()?;
        state.record(BackendMethod::CreateDisk, &spec.zone, &spec.name)?;

        let link = disk_link(&spec.zone, &spec.name);
        let operation = Operation::pending(
            OperationKind::InsertDisk,
            Some(spec.zone.clone()),
            link.clone(),
        );

        if state.disks.contains_key(&link) {
            return Ok(state.submit_with_outcome(
                operation,
                None,
                Some(OperationError::new(
                    error_codes::RESOURCE_ALREADY_EXISTS,
                    format!("The resource '{}' already exists", link),
                )),
            ));
        }

        let disk = Disk {
            name: spec.name.clone(),
            zone: spec.zone.clone(),
            self_link: link,
            source_image: spec.source_image.clone(),
            status: "READY".to_string(),
        };
        Ok(state.submit(operation, Some(Effect::InsertDisk(disk))))
    }

    async fn get_disk(&self, zone: &str, name: &str) -> ControlPlaneResult<Disk> {
        let mut state = self.lock()?;
        state.record(BackendMethod::GetDisk, zone, name)?;

        let link = disk_link(zone, name);
        state
            .disks
            .get(&link)
            .map(copy_disk)
            .ok_or_else(|| ControlPlaneError::not_found(link))
    }

    async fn delete_disk(&self, zone: &str, name: &str) -> ControlPlaneResult<Operation> {
        let mut state = self.lock()?;
        state.record(BackendMethod::DeleteDisk, zone, name)?;

        let link = disk_link(zone, name);
        if !state.disks.contains_key(&link) {
            return Err(ControlPlaneError::not_found(link));
        }

        let operation =
            Operation::pending(OperationKind::DeleteDisk, Some(zone.to_string()), link.clone());
        Ok(state.submit(operation, Some(Effect::RemoveDisk(link))))
    }

    async fn create_instance(&self, spec: &InstanceSpec) -> ControlPlaneResult<Operation> {
        let mut state = self.lock()?;
        state.record(BackendMethod::CreateInstance, &spec.zone, &spec.name)?;

        let link = instance_link(&spec.zone, &spec.name);
        let operation = Operation::pending(
            OperationKind::InsertInstance,
            Some(spec.zone.clone()),
            link.clone(),
        );

        let rejection = if state.instances.contains_key(&link) {
            Some(OperationError::new(
                error_codes::RESOURCE_ALREADY_EXISTS,
                format!("The resource '{}' already exists", link),
            ))
        } else if let Some(missing) = spec
            .boot_disk
            .as_ref()
            .filter(|disk| !state.disks.contains_key(&disk.source))
        {
            Some(OperationError::new(
                error_codes::RESOURCE_NOT_FOUND,
                format!("The resource '{}' was not found", missing.source),
            ))
        } else if spec.boot_disk.is_none() {
            Some(OperationError::new(
                "INVALID_FIELD_VALUE",
                "Instance must have a boot disk",
            ))
        } else if state
            .instance_quota
            .is_some_and(|quota| state.instances.len() + state.pending_instance_inserts() >= quota)
        {
            Some(OperationError::new(
                error_codes::QUOTA_EXCEEDED,
                format!("Quota 'INSTANCES' exceeded in zone {}", spec.zone),
            ))
        } else {
            None
        };

        if rejection.is_some() {
            return Ok(state.submit_with_outcome(operation, None, rejection));
        }

        let mut script: VecDeque<String> = state.status_script.iter().cloned().collect();
        let initial = script
            .pop_front()
            .unwrap_or_else(|| bidfleet_core::RUNNING_STATUS.to_string());
        let address = state.next_address;
        state.next_address += 1;

        let instance = Instance {
            name: spec.name.clone(),
            zone: spec.zone.clone(),
            status: initial,
            machine_type: last_segment(&spec.machine_type).to_string(),
            tags: spec.tags.clone(),
            metadata: spec.metadata.clone(),
            internal_ip: Some(format!("10.240.0.{}", address)),
            external_ip: spec
                .network_interface
                .access_config
                .as_ref()
                .map(|_| format!("203.0.113.{}", address)),
            self_link: link,
        };
        let simulated = SimulatedInstance {
            instance,
            upcoming: script,
            hidden_reads: state.visibility_lag,
        };

        Ok(state.submit(
            operation,
            Some(Effect::InsertInstance(Box::new(simulated))),
        ))
    }

    async fn get_instance(&self, zone: &str, name: &str) -> ControlPlaneResult<Instance> {
        let mut state = self.lock()?;
        state.record(BackendMethod::GetInstance, zone, name)?;

        let link = instance_link(zone, name);
        let simulated = state
            .instances
            .get_mut(&link)
            .ok_or_else(|| ControlPlaneError::not_found(link.clone()))?;

        if simulated.hidden_reads > 0 {
            simulated.hidden_reads -= 1;
            return Err(ControlPlaneError::not_found(link));
        }

        let observed = simulated.instance.clone();
        if let Some(next) = simulated.upcoming.pop_front() {
            simulated.instance.status = next;
        }
        Ok(observed)
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> ControlPlaneResult<Operation> {
        let mut state = self.lock()?;
        state.record(BackendMethod::DeleteInstance, zone, name)?;

        let link = instance_link(zone, name);
        let simulated = state
            .instances
            .get_mut(&link)
            .ok_or_else(|| ControlPlaneError::not_found(link.clone()))?;
        simulated.instance.status = "STOPPING".to_string();
        simulated.upcoming.clear();

        let operation = Operation::pending(
            OperationKind::DeleteInstance,
            Some(zone.to_string()),
            link.clone(),
        );
        Ok(state.submit(operation, Some(Effect::RemoveInstance(link))))
    }

    async fn wait_operation(&self, operation: &Operation) -> ControlPlaneResult<Operation> {
        {
            let mut state = self.lock()?;
            state.record(
                BackendMethod::WaitOperation,
                operation.zone.as_deref().unwrap_or_default(),
                operation.target_name(),
            )?;
        }

        if self.wait_latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.wait_latency).await;
        }

        let mut state = self.lock()?;
        let stalled = state.stalled.contains(&operation.kind);
        let pending = state
            .operations
            .get_mut(&operation.id)
            .filter(|pending| pending.operation.zone == operation.zone)
            .ok_or_else(|| ControlPlaneError::not_found(operation.id.clone()))?;

        if stalled || pending.polls_remaining > 1 {
            pending.polls_remaining = pending.polls_remaining.saturating_sub(1).max(1);
            let mut running = pending.operation.clone();
            running.status = OperationStatus::Running;
            return Ok(running);
        }

        let Some(pending) = state.operations.remove(&operation.id) else {
            return Err(ControlPlaneError::not_found(operation.id.clone()));
        };

        if let Some(error) = pending.outcome {
            return Ok(pending.operation.failed(error));
        }
        if let Some(effect) = pending.effect {
            state.apply(effect);
        }
        Ok(pending.operation.completed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidfleet_core::{NetworkInterface, ResourceKind};
    use std::collections::{BTreeMap, BTreeSet};

    const ZONE: &str = "rtb-us-east1-a";

    fn spec_with_disk(name: &str, disk: Option<&str>) -> InstanceSpec {
        InstanceSpec {
            kind: ResourceKind::Bidder,
            name: name.to_string(),
            zone: ZONE.to_string(),
            machine_type: format!("zones/{}/machineTypes/standard-1-cpu", ZONE),
            image: "projects/bidfleet-images/global/images/debian".to_string(),
            tags: ["bidder".to_string()].into_iter().collect(),
            metadata: BTreeMap::new(),
            network_interface: NetworkInterface {
                network: "global/networks/default".to_string(),
                access_config: None,
            },
            service_account_scopes: BTreeSet::new(),
            description: String::new(),
            boot_disk: disk.map(|source| bidfleet_core::AttachedDisk {
                source: source.to_string(),
                boot: true,
                auto_delete: true,
            }),
        }
    }

    async fn create_ready_disk(backend: &InMemoryComputeBackend, millis: i64) -> String {
        let spec = DiskSpec::new(ZONE, "projects/bidfleet-images/global/images/debian", millis);
        let op = backend.create_disk(&spec).await.unwrap();
        let done = backend.wait_operation(&op).await.unwrap();
        assert!(done.is_done());
        disk_link(ZONE, &spec.name)
    }

    #[tokio::test]
    async fn test_disk_exists_only_after_operation_completes() {
        let backend = InMemoryComputeBackend::new();
        backend.set_polls_per_operation(2);
        let spec = DiskSpec::new(ZONE, "images/debian", 1);

        let op = backend.create_disk(&spec).await.unwrap();
        assert!(backend.get_disk(ZONE, &spec.name).await.is_err());

        let first = backend.wait_operation(&op).await.unwrap();
        assert!(!first.is_done());
        let second = backend.wait_operation(&op).await.unwrap();
        assert!(second.is_done());

        let disk = backend.get_disk(ZONE, &spec.name).await.unwrap();
        assert_eq!(disk.status, "READY");
    }

    #[tokio::test]
    async fn test_instance_walks_status_script() {
        let backend = InMemoryComputeBackend::new();
        let disk = create_ready_disk(&backend, 1).await;

        let op = backend
            .create_instance(&spec_with_disk("bidder-1", Some(&disk)))
            .await
            .unwrap();
        backend.wait_operation(&op).await.unwrap();

        let statuses: Vec<String> = {
            let mut seen = Vec::new();
            for _ in 0..4 {
                seen.push(backend.get_instance(ZONE, "bidder-1").await.unwrap().status);
            }
            seen
        };
        assert_eq!(statuses, vec!["PROVISIONING", "STAGING", "RUNNING", "RUNNING"]);
    }

    #[tokio::test]
    async fn test_instance_without_disk_fails_operation() {
        let backend = InMemoryComputeBackend::new();
        let op = backend
            .create_instance(&spec_with_disk("bidder-1", Some("zones/z/disks/missing")))
            .await
            .unwrap();
        let done = backend.wait_operation(&op).await.unwrap();
        assert_eq!(done.error.unwrap().code, error_codes::RESOURCE_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_quota_counts_pending_inserts() {
        let backend = InMemoryComputeBackend::new();
        backend.set_instance_quota(1);
        let disk_a = create_ready_disk(&backend, 1).await;
        let disk_b = create_ready_disk(&backend, 2).await;

        let first = backend
            .create_instance(&spec_with_disk("bidder-1", Some(&disk_a)))
            .await
            .unwrap();
        let second = backend
            .create_instance(&spec_with_disk("bidder-2", Some(&disk_b)))
            .await
            .unwrap();

        assert!(backend.wait_operation(&first).await.unwrap().error.is_none());
        let rejected = backend.wait_operation(&second).await.unwrap();
        assert_eq!(rejected.error.unwrap().code, error_codes::QUOTA_EXCEEDED);
    }

    #[tokio::test]
    async fn test_visibility_lag_hides_new_instance() {
        let backend = InMemoryComputeBackend::new();
        backend.set_visibility_lag(1);
        let disk = create_ready_disk(&backend, 1).await;
        let op = backend
            .create_instance(&spec_with_disk("bidder-1", Some(&disk)))
            .await
            .unwrap();
        backend.wait_operation(&op).await.unwrap();

        let hidden = backend.get_instance(ZONE, "bidder-1").await.unwrap_err();
        assert!(hidden.is_not_found_for(&instance_link(ZONE, "bidder-1")));
        assert!(backend.get_instance(ZONE, "bidder-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_call_log_keeps_only_recent_calls() {
        let backend = InMemoryComputeBackend::new();
        backend.set_call_log_limit(2);

        for name in ["bidder-1", "bidder-2", "bidder-3"] {
            let _ = backend.get_instance(ZONE, name).await;
        }

        let names: Vec<String> = backend.calls().into_iter().map(|call| call.name).collect();
        assert_eq!(names, vec!["bidder-2", "bidder-3"]);
        assert_eq!(backend.call_count(BackendMethod::GetInstance), 2);
    }

    #[tokio::test]
    async fn test_wait_with_wrong_zone_is_not_found() {
        let backend = InMemoryComputeBackend::new();
        let op = backend
            .create_disk(&DiskSpec::new(ZONE, "images/debian", 1))
            .await
            .unwrap();

        let mut misplaced = op.clone();
        misplaced.zone = Some("other-zone".to_string());
        let result = backend.wait_operation(&misplaced).await;
        assert!(matches!(
            result,
            Err(ControlPlaneError::ResourceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_injected_call_failure_is_consumed_once() {
        let backend = InMemoryComputeBackend::new();
        backend.fail_next_call(
            BackendMethod::GetInstance,
            ControlPlaneError::Unknown("backend unavailable".to_string()),
        );

        assert!(matches!(
            backend.get_instance(ZONE, "bidder-1").await,
            Err(ControlPlaneError::Unknown(_))
        ));
        assert!(matches!(
            backend.get_instance(ZONE, "bidder-1").await,
            Err(ControlPlaneError::ResourceNotFound { .. })
        ));
        assert_eq!(backend.call_count(BackendMethod::GetInstance), 2);
    }

    #[tokio::test]
    async fn test_delete_removes_instance_on_completion() {
        let backend = InMemoryComputeBackend::new();
        let disk = create_ready_disk(&backend, 1).await;
        let op = backend
            .create_instance(&spec_with_disk("bidder-1", Some(&disk)))
            .await
            .unwrap();
        backend.wait_operation(&op).await.unwrap();

        let delete = backend.delete_instance(ZONE, "bidder-1").await.unwrap();
        assert_eq!(
            backend.instance(ZONE, "bidder-1").unwrap().status,
            "STOPPING"
        );
        backend.wait_operation(&delete).await.unwrap();
        assert!(backend.instance(ZONE, "bidder-1").is_none());
    }
}
