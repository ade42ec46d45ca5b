use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::compute::{Disk, DiskSpec};
use crate::ResourceKind;

/// Upper bound for the startup script carried in instance metadata.
pub const MAX_BOOTSTRAP_SCRIPT_BYTES: usize = 15_000;

/// Metadata keys read by the instance's own bootstrap process. Bit-exact.
pub mod metadata_keys {
    pub const PLATFORM: &str = "platform";
    pub const LISTEN_PORT: &str = "listen_port";
    pub const ADMIN_PORT: &str = "admin_port";
    pub const LOAD_BALANCER_HOST: &str = "load_balancer_host";
    pub const LOAD_BALANCER_PORT: &str = "load_balancer_port";
    pub const BID_INTERCEPTORS: &str = "bid_interceptors";
    pub const CLICK_INTERCEPTORS: &str = "click_interceptors";
    pub const IMPRESSION_INTERCEPTORS: &str = "impression_interceptors";
    pub const JVM_PARAMETERS: &str = "jvm_parameters";
    pub const MAIN_PARAMETERS: &str = "main_parameters";
    pub const API_PROJECT_ID: &str = "api_project_id";
    pub const API_PROJECT_NUMBER: &str = "api_project_number";
    pub const DOUBLECLICK_ENCRYPTION_KEY: &str = "doubleclick_encryption_key";
    pub const DOUBLECLICK_INTEGRITY_KEY: &str = "doubleclick_integrity_key";
    pub const DOUBLECLICK_COOKIE_MATCH_URL: &str = "doubleclick_cookie_match_url";
    pub const DOUBLECLICK_COOKIE_MATCH_NID: &str = "doubleclick_cookie_match_nid";
    pub const STARTUP_SCRIPT: &str = "startup-script";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessConfig {
    pub name: String,
    pub network_tier: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            name: "External NAT".to_string(),
            network_tier: "PREMIUM".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub network: String,
    /// Present only when the tenant allows external IPs.
    pub access_config: Option<AccessConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedDisk {
    pub source: String,
    pub boot: bool,
    pub auto_delete: bool,
}

/// Everything needed to submit a create-instance call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub kind: ResourceKind,
    pub name: String,
    pub zone: String,
    pub machine_type: String,
    pub image: String,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, String>,
    pub network_interface: NetworkInterface,
    pub service_account_scopes: BTreeSet<String>,
    pub description: String,
    pub boot_disk: Option<AttachedDisk>,
}

impl InstanceSpec {
    pub fn disk_spec(&self, created_at_millis: i64) -> DiskSpec {
        DiskSpec::new(self.zone.clone(), self.image.clone(), created_at_millis)
    }

    /// Attaches `disk` as the auto-deleting boot volume. Takes the disk by
    /// value so a created disk can back only one instance.
    pub fn with_boot_disk(mut self, disk: Disk) -> Self {
        self.boot_disk = Some(AttachedDisk {
            source: disk.self_link,
            boot: true,
            auto_delete: true,
        });
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Per-request replacements for tenant defaults. `None` means "keep the
/// tenant default"; `Some` replaces the whole value, lists included.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceOverrides {
    pub machine_type: Option<String>,
    pub image: Option<String>,
    pub listen_port: Option<u16>,
    pub admin_port: Option<u16>,
    pub jvm_parameters: Option<String>,
    pub main_parameters: Option<String>,
    pub bid_interceptors: Option<Vec<String>>,
    pub click_interceptors: Option<Vec<String>>,
    pub impression_interceptors: Option<Vec<String>>,
}

impl InstanceOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn with_main_parameters(mut self, main_parameters: impl Into<String>) -> Self {
        self.main_parameters = Some(main_parameters.into());
        self
    }
}
