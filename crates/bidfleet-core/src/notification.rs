use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::compute::Instance;
use crate::{InstanceState, ResourceKind};

/// Public view of an instance at the moment a lifecycle event was published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub kind: ResourceKind,
    pub name: String,
    pub zone: String,
    pub state: InstanceState,
    pub raw_status: Option<String>,
    pub machine_type: Option<String>,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl ResourceSnapshot {
    /// Snapshot for a state the controller asserts before the backend does.
    pub fn synthesized(
        kind: ResourceKind,
        zone: impl Into<String>,
        name: impl Into<String>,
        state: InstanceState,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            zone: zone.into(),
            state,
            raw_status: None,
            machine_type: None,
            internal_ip: None,
            external_ip: None,
            observed_at: Utc::now(),
        }
    }

    pub fn observed(kind: ResourceKind, instance: &Instance) -> Self {
        Self {
            kind,
            name: instance.name.clone(),
            zone: instance.zone.clone(),
            state: instance.state(),
            raw_status: Some(instance.status.clone()),
            machine_type: Some(instance.machine_type.clone()),
            internal_ip: instance.internal_ip.clone(),
            external_ip: instance.external_ip.clone(),
            observed_at: Utc::now(),
        }
    }

    pub fn with_state(mut self, state: InstanceState) -> Self {
        self.state = state;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub tenant_id: String,
    pub topic: String,
    pub snapshot: ResourceSnapshot,
}

impl NotificationEvent {
    pub fn new(
        tenant_id: impl Into<String>,
        topic: impl Into<String>,
        snapshot: ResourceSnapshot,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            topic: topic.into(),
            snapshot,
        }
    }

    pub fn state(&self) -> InstanceState {
        self.snapshot.state
    }
}
