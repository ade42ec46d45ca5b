//! Compute backend resources as seen by the orchestrator: disks, instances and
//! the operation handles returned by every mutating call.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::{InstanceState, ResourceKind};

/// Backend error codes the operation classifier understands.
pub mod error_codes {
    pub const RESOURCE_NOT_FOUND: &str = "RESOURCE_NOT_FOUND";
    pub const QUOTA_EXCEEDED: &str = "QUOTA_EXCEEDED";
    pub const RESOURCE_ALREADY_EXISTS: &str = "RESOURCE_ALREADY_EXISTS";
}

/// Disk names are grepped by operational tooling; keep the format stable.
pub fn disk_name(zone: &str, created_at_millis: i64) -> String {
    format!("disk-{}-{}", zone, created_at_millis)
}

pub fn disk_link(zone: &str, name: &str) -> String {
    format!("zones/{}/disks/{}", zone, name)
}

pub fn instance_link(zone: &str, name: &str) -> String {
    format!("zones/{}/instances/{}", zone, name)
}

fn last_segment(link: &str) -> &str {
    link.rsplit('/').next().unwrap_or(link)
}

/// Request for a root persistent disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    pub zone: String,
    pub name: String,
    pub source_image: String,
}

impl DiskSpec {
    pub fn new(zone: impl Into<String>, source_image: impl Into<String>, created_at_millis: i64) -> Self {
        let zone = zone.into();
        Self {
            name: disk_name(&zone, created_at_millis),
            zone,
            source_image: source_image.into(),
        }
    }
}

/// A created disk. Not `Clone`: it is handed to exactly one instance spec.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub name: String,
    pub zone: String,
    pub self_link: String,
    pub source_image: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    InsertDisk,
    DeleteDisk,
    InsertInstance,
    DeleteInstance,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::InsertDisk => "insert_disk",
            OperationKind::DeleteDisk => "delete_disk",
            OperationKind::InsertInstance => "insert_instance",
            OperationKind::DeleteInstance => "delete_instance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub code: String,
    pub message: String,
}

impl OperationError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Handle for an asynchronous backend mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub kind: OperationKind,
    pub zone: Option<String>,
    pub target_link: String,
    pub status: OperationStatus,
    pub error: Option<OperationError>,
}

impl Operation {
    pub fn pending(kind: OperationKind, zone: Option<String>, target_link: impl Into<String>) -> Self {
        Self {
            id: format!("operation-{}", Uuid::new_v4()),
            kind,
            zone,
            target_link: target_link.into(),
            status: OperationStatus::Pending,
            error: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }

    /// Name of the resource the operation acts on.
    pub fn target_name(&self) -> &str {
        last_segment(&self.target_link)
    }

    pub fn completed(mut self) -> Self {
        self.status = OperationStatus::Done;
        self
    }

    pub fn failed(mut self, error: OperationError) -> Self {
        self.status = OperationStatus::Done;
        self.error = Some(error);
        self
    }
}

/// An instance as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub zone: String,
    pub status: String,
    pub machine_type: String,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    pub self_link: String,
}

impl Instance {
    pub fn state(&self) -> InstanceState {
        InstanceState::from_raw_status(&self.status)
    }

    /// Role inferred from the instance's network tags.
    pub fn kind(&self) -> Option<ResourceKind> {
        [ResourceKind::Bidder, ResourceKind::LoadBalancer]
            .into_iter()
            .find(|kind| self.tags.contains(kind.tag()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_disk_spec_name_format() {
        let spec = DiskSpec::new("rtb-us-east1-a", "images/debian", 1_700_000_000_123);
        assert_eq!(spec.name, "disk-rtb-us-east1-a-1700000000123");
        assert_eq!(spec.zone, "rtb-us-east1-a");
    }

    #[test]
    fn test_operation_target_name() {
        let op = Operation::pending(
            OperationKind::InsertInstance,
            Some("rtb-us-east1-a".to_string()),
            instance_link("rtb-us-east1-a", "bidder-1"),
        );
        assert_eq!(op.target_name(), "bidder-1");
        assert!(!op.is_done());
        assert!(op.clone().completed().is_done());
    }

    #[test]
    fn test_failed_operation_is_terminal() {
        let op = Operation::pending(OperationKind::InsertDisk, None, "disks/d")
            .failed(OperationError::new(error_codes::QUOTA_EXCEEDED, "cpus"));
        assert!(op.is_done());
        assert_eq!(op.error.unwrap().code, "QUOTA_EXCEEDED");
    }

    #[test]
    fn test_instance_kind_from_tags() {
        let instance = Instance {
            name: "lb-1".to_string(),
            zone: "z".to_string(),
            status: "RUNNING".to_string(),
            machine_type: "standard-1-cpu".to_string(),
            tags: ["load-balancer".to_string()].into_iter().collect(),
            metadata: BTreeMap::new(),
            internal_ip: None,
            external_ip: None,
            self_link: instance_link("z", "lb-1"),
        };
        assert_eq!(instance.kind(), Some(ResourceKind::LoadBalancer));
        assert_eq!(instance.state(), InstanceState::Running);
    }

    proptest! {
        #[test]
        fn prop_disk_name_round_trips_zone_and_millis(zone in "[a-z][a-z0-9-]{0,20}", millis in 0i64..4_000_000_000_000) {
            let name = disk_name(&zone, millis);
            let expected_prefix = format!("disk-{}-", zone);
            prop_assert!(name.starts_with(&expected_prefix));
            prop_assert_eq!(&name[expected_prefix.len()..], millis.to_string());
        }
    }
}
