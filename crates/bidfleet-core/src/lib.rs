pub mod compute;
pub mod notification;
pub mod spec;
pub mod tenant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub use compute::{
    disk_link, disk_name, instance_link, Disk, DiskSpec, Instance, Operation, OperationError,
    OperationKind, OperationStatus,
};
pub use notification::{NotificationEvent, ResourceSnapshot};
pub use spec::{
    AccessConfig, AttachedDisk, InstanceOverrides, InstanceSpec, NetworkInterface,
    MAX_BOOTSTRAP_SCRIPT_BYTES,
};
pub use tenant::{
    BidderSettings, DoubleClickSettings, LoadBalancerSettings, PlatformConfig, TenantConfig,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("Invalid instance spec: {0}")]
    InvalidSpec(String),
    #[error("Bootstrap script is {size} bytes, limit is {limit} bytes")]
    BootstrapScriptTooLarge { size: usize, limit: usize },
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Role of a provisioned virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Bidder,
    LoadBalancer,
}

impl ResourceKind {
    /// Network tag written onto instances of this kind.
    pub fn tag(&self) -> &'static str {
        match self {
            ResourceKind::Bidder => "bidder",
            ResourceKind::LoadBalancer => "load-balancer",
        }
    }

    /// Prefix used for generated instance names.
    pub fn name_prefix(&self) -> &'static str {
        self.tag()
    }

    /// Notification topic that observers of this kind subscribe to.
    pub fn topic(&self) -> &'static str {
        match self {
            ResourceKind::Bidder => "bidder-instances",
            ResourceKind::LoadBalancer => "load-balancer-instances",
        }
    }

    pub fn generated_name(&self, epoch_millis: i64) -> String {
        format!("{}-{}", self.name_prefix(), epoch_millis)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Raw backend status reported once an instance is fully up.
pub const RUNNING_STATUS: &str = "RUNNING";

/// The backend's notion of "up". Compared literally and case-sensitively;
/// every running check in the workspace goes through here.
pub fn is_running_status(raw_status: &str) -> bool {
    raw_status == RUNNING_STATUS
}

/// Observed lifecycle state of an instance. Never stored, only published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Starting,
    Running,
    Stopping,
    Terminated,
    Error,
}

impl InstanceState {
    pub fn from_raw_status(raw_status: &str) -> Self {
        if is_running_status(raw_status) {
            return InstanceState::Running;
        }
        match raw_status {
            "PROVISIONING" | "STAGING" | "REPAIRING" => InstanceState::Starting,
            "STOPPING" | "SUSPENDING" => InstanceState::Stopping,
            "TERMINATED" | "STOPPED" | "SUSPENDED" => InstanceState::Terminated,
            _ => InstanceState::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Starting => "STARTING",
            InstanceState::Running => "RUNNING",
            InstanceState::Stopping => "STOPPING",
            InstanceState::Terminated => "TERMINATED",
            InstanceState::Error => "ERROR",
        }
    }

    /// Whether `next` may follow `self` within one controller invocation.
    /// `STARTING < {RUNNING, ERROR}` and `STOPPING < TERMINATED`; nothing
    /// leaves RUNNING or TERMINATED.
    pub fn may_precede(&self, next: InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, next),
            (Starting, Running) | (Starting, Error) | (Stopping, Terminated) | (Stopping, Error)
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
    pub details: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: HashMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_running_predicate_is_literal() {
        assert!(is_running_status("RUNNING"));
        assert!(!is_running_status("running"));
        assert!(!is_running_status(" RUNNING"));
        assert!(!is_running_status("STAGING"));
    }

    #[test]
    fn test_raw_status_mapping() {
        assert_eq!(
            InstanceState::from_raw_status("PROVISIONING"),
            InstanceState::Starting
        );
        assert_eq!(
            InstanceState::from_raw_status("STAGING"),
            InstanceState::Starting
        );
        assert_eq!(
            InstanceState::from_raw_status("RUNNING"),
            InstanceState::Running
        );
        assert_eq!(
            InstanceState::from_raw_status("STOPPING"),
            InstanceState::Stopping
        );
        assert_eq!(
            InstanceState::from_raw_status("TERMINATED"),
            InstanceState::Terminated
        );
        assert_eq!(
            InstanceState::from_raw_status("garbage"),
            InstanceState::Error
        );
    }

    #[test]
    fn test_partial_order() {
        use InstanceState::*;
        assert!(Starting.may_precede(Running));
        assert!(Starting.may_precede(Error));
        assert!(Stopping.may_precede(Terminated));
        assert!(!Running.may_precede(Starting));
        assert!(!Terminated.may_precede(Stopping));
        assert!(!Starting.may_precede(Starting));
    }

    #[test]
    fn test_instance_state_serializes_upper_case() {
        let json = serde_json::to_string(&InstanceState::Terminated).unwrap();
        assert_eq!(json, "\"TERMINATED\"");
        let parsed: InstanceState = serde_json::from_str("\"STOPPING\"").unwrap();
        assert_eq!(parsed, InstanceState::Stopping);
    }

    #[test]
    fn test_resource_kind_serde_tokens() {
        use serde_test::{assert_tokens, Token};
        assert_tokens(
            &ResourceKind::LoadBalancer,
            &[Token::UnitVariant {
                name: "ResourceKind",
                variant: "load_balancer",
            }],
        );
    }

    #[test]
    fn test_resource_kind_naming() {
        assert_eq!(
            ResourceKind::Bidder.generated_name(1_700_000_000_000),
            "bidder-1700000000000"
        );
        assert_eq!(ResourceKind::LoadBalancer.tag(), "load-balancer");
        assert_ne!(
            ResourceKind::Bidder.topic(),
            ResourceKind::LoadBalancer.topic()
        );
    }

    #[test]
    fn test_error_response_with_details() {
        let mut details = HashMap::new();
        details.insert("zone".to_string(), "rtb-us-east1-a".to_string());
        let response = ErrorResponse::new("CONFLICT", "quota").with_details(details);
        assert_eq!(response.error_code, "CONFLICT");
        assert_eq!(
            response.details.unwrap().get("zone").map(String::as_str),
            Some("rtb-us-east1-a")
        );
    }

    proptest! {
        #[test]
        fn prop_only_literal_running_maps_to_running(raw in "[A-Za-z_ ]{0,16}") {
            let state = InstanceState::from_raw_status(&raw);
            prop_assert_eq!(state == InstanceState::Running, raw == "RUNNING");
        }
    }
}
