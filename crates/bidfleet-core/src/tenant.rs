//! Per-tenant defaults and platform-wide settings consumed by the spec builder.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::spec::MAX_BOOTSTRAP_SCRIPT_BYTES;
use crate::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BidderSettings {
    pub listen_port: u16,
    pub admin_port: u16,
    pub bid_interceptors: Vec<String>,
    pub click_interceptors: Vec<String>,
    pub impression_interceptors: Vec<String>,
    pub jvm_parameters: String,
    pub main_parameters: String,
}

impl Default for BidderSettings {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            admin_port: 8081,
            bid_interceptors: Vec::new(),
            click_interceptors: Vec::new(),
            impression_interceptors: Vec::new(),
            jvm_parameters: String::new(),
            main_parameters: String::new(),
        }
    }
}

/// The load balancer paired with a tenant's bidders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerSettings {
    pub host: String,
    pub port: u16,
    pub admin_port: u16,
    pub jvm_parameters: String,
    pub main_parameters: String,
}

impl Default for LoadBalancerSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 80,
            admin_port: 8082,
            jvm_parameters: String::new(),
            main_parameters: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoubleClickSettings {
    pub encryption_key: Option<String>,
    pub integrity_key: Option<String>,
    pub cookie_match_url: Option<String>,
    pub cookie_match_nid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    pub tenant_id: String,
    pub api_project_id: String,
    pub api_project_number: u64,
    pub default_image: String,
    /// Default machine type keyed by zone.
    pub machine_types: BTreeMap<String, String>,
    pub oauth_scopes: BTreeSet<String>,
    pub external_ip_enabled: bool,
    pub bidder: BidderSettings,
    pub load_balancer: LoadBalancerSettings,
    pub doubleclick: DoubleClickSettings,
}

impl TenantConfig {
    pub fn machine_type_for(&self, zone: &str) -> Option<&str> {
        self.machine_types.get(zone).map(String::as_str)
    }
}

/// Settings shared by every tenant on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub platform: String,
    pub image_project: String,
    pub network: String,
    pub default_scopes: BTreeSet<String>,
    pub bootstrap_script: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            platform: "bidfleet".to_string(),
            image_project: "bidfleet-images".to_string(),
            network: "default".to_string(),
            default_scopes: [
                "https://www.googleapis.com/auth/devstorage.read_only",
                "https://www.googleapis.com/auth/logging.write",
            ]
            .into_iter()
            .map(ToString::to_string)
            .collect(),
            bootstrap_script: String::new(),
        }
    }
}

impl PlatformConfig {
    pub fn validate(&self) -> Result<()> {
        let size = self.bootstrap_script.len();
        if size > MAX_BOOTSTRAP_SCRIPT_BYTES {
            return Err(CoreError::BootstrapScriptTooLarge {
                size,
                limit: MAX_BOOTSTRAP_SCRIPT_BYTES,
            });
        }
        if self.platform.trim().is_empty() {
            return Err(CoreError::InvalidSpec("platform name is empty".to_string()));
        }
        Ok(())
    }
}
