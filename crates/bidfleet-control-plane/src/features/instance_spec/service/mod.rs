use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use bidfleet_core::spec::metadata_keys as keys;
use bidfleet_core::{
    AccessConfig, CoreError, InstanceOverrides, InstanceSpec, NetworkInterface, PlatformConfig,
    ResourceKind, TenantConfig,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Inputs for one spec. `requested_at` is passed in so that building stays
/// deterministic.
#[derive(Debug, Clone, Copy)]
pub struct SpecRequest<'a> {
    pub kind: ResourceKind,
    pub tenant: &'a TenantConfig,
    pub zone: &'a str,
    pub name: &'a str,
    pub overrides: &'a InstanceOverrides,
    pub requester: &'a str,
    pub requested_at: DateTime<Utc>,
}

/// Turns tenant defaults plus request overrides into an [`InstanceSpec`].
#[derive(Debug, Clone)]
pub struct InstanceSpecBuilder {
    platform: PlatformConfig,
}

impl InstanceSpecBuilder {
    /// Fails when the platform settings are unusable, e.g. a bootstrap
    /// script over the metadata size limit.
    pub fn new(platform: PlatformConfig) -> Result<Self, CoreError> {
        platform.validate()?;
        Ok(Self { platform })
    }

    pub fn build(&self, request: &SpecRequest<'_>) -> ControlPlaneResult<InstanceSpec> {
        let tenant = request.tenant;
        let overrides = request.overrides;

        let machine_type = overrides
            .machine_type
            .as_deref()
            .or_else(|| tenant.machine_type_for(request.zone))
            .ok_or_else(|| {
                ControlPlaneError::ValidationError(format!(
                    "Tenant {} has no machine type for zone {}",
                    tenant.tenant_id, request.zone
                ))
            })?;

        let image = overrides
            .image
            .as_deref()
            .unwrap_or(&tenant.default_image);
        if image.trim().is_empty() {
            return Err(ControlPlaneError::ValidationError(format!(
                "Tenant {} has no default image",
                tenant.tenant_id
            )));
        }

        let mut metadata = self.platform_metadata(tenant);
        let role_metadata = match request.kind {
            ResourceKind::Bidder => bidder_metadata(tenant, overrides),
            ResourceKind::LoadBalancer => load_balancer_metadata(tenant, overrides),
        };
        metadata.extend(role_metadata);

        let tags: BTreeSet<String> = [request.kind.tag().to_string(), self.platform.platform.clone()]
            .into_iter()
            .collect();

        let service_account_scopes = tenant
            .oauth_scopes
            .union(&self.platform.default_scopes)
            .cloned()
            .collect();

        let network_interface = NetworkInterface {
            network: format!("global/networks/{}", self.platform.network),
            access_config: tenant.external_ip_enabled.then(AccessConfig::default),
        };

        Ok(InstanceSpec {
            kind: request.kind,
            name: request.name.to_string(),
            zone: request.zone.to_string(),
            machine_type: machine_type_reference(request.zone, machine_type),
            image: self.image_reference(image),
            tags,
            metadata,
            network_interface,
            service_account_scopes,
            description: format!(
                "{} for tenant {} requested by {} at {}",
                request.kind,
                tenant.tenant_id,
                request.requester,
                request.requested_at.to_rfc3339()
            ),
            boot_disk: None,
        })
    }

    fn image_reference(&self, image: &str) -> String {
        if image.contains('/') {
            image.to_string()
        } else {
            format!(
                "projects/{}/global/images/{}",
                self.platform.image_project, image
            )
        }
    }

    fn platform_metadata(&self, tenant: &TenantConfig) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        insert_non_empty(&mut metadata, keys::PLATFORM, self.platform.platform.clone());
        insert_non_empty(&mut metadata, keys::API_PROJECT_ID, tenant.api_project_id.clone());
        if tenant.api_project_number != 0 {
            metadata.insert(
                keys::API_PROJECT_NUMBER.to_string(),
                tenant.api_project_number.to_string(),
            );
        }

        let doubleclick = &tenant.doubleclick;
        for (key, value) in [
            (keys::DOUBLECLICK_ENCRYPTION_KEY, &doubleclick.encryption_key),
            (keys::DOUBLECLICK_INTEGRITY_KEY, &doubleclick.integrity_key),
            (keys::DOUBLECLICK_COOKIE_MATCH_URL, &doubleclick.cookie_match_url),
            (keys::DOUBLECLICK_COOKIE_MATCH_NID, &doubleclick.cookie_match_nid),
        ] {
            if let Some(value) = value {
                insert_non_empty(&mut metadata, key, value.trim().to_string());
            }
        }

        insert_non_empty(
            &mut metadata,
            keys::STARTUP_SCRIPT,
            self.platform.bootstrap_script.clone(),
        );
        metadata
    }
}

fn bidder_metadata(tenant: &TenantConfig, overrides: &InstanceOverrides) -> BTreeMap<String, String> {
    let bidder = &tenant.bidder;
    let load_balancer = &tenant.load_balancer;
    let mut metadata = BTreeMap::new();

    metadata.insert(
        keys::LISTEN_PORT.to_string(),
        overrides.listen_port.unwrap_or(bidder.listen_port).to_string(),
    );
    metadata.insert(
        keys::ADMIN_PORT.to_string(),
        overrides.admin_port.unwrap_or(bidder.admin_port).to_string(),
    );
    insert_non_empty(&mut metadata, keys::LOAD_BALANCER_HOST, load_balancer.host.clone());
    metadata.insert(
        keys::LOAD_BALANCER_PORT.to_string(),
        load_balancer.port.to_string(),
    );

    for (key, override_value, default) in [
        (
            keys::BID_INTERCEPTORS,
            &overrides.bid_interceptors,
            &bidder.bid_interceptors,
        ),
        (
            keys::CLICK_INTERCEPTORS,
            &overrides.click_interceptors,
            &bidder.click_interceptors,
        ),
        (
            keys::IMPRESSION_INTERCEPTORS,
            &overrides.impression_interceptors,
            &bidder.impression_interceptors,
        ),
    ] {
        let interceptors = override_value.as_ref().unwrap_or(default);
        insert_non_empty(&mut metadata, key, join_list(interceptors));
    }

    insert_launch_parameters(
        &mut metadata,
        overrides,
        &bidder.jvm_parameters,
        &bidder.main_parameters,
    );
    metadata
}

fn load_balancer_metadata(
    tenant: &TenantConfig,
    overrides: &InstanceOverrides,
) -> BTreeMap<String, String> {
    let load_balancer = &tenant.load_balancer;
    let mut metadata = BTreeMap::new();

    metadata.insert(
        keys::LISTEN_PORT.to_string(),
        overrides.listen_port.unwrap_or(load_balancer.port).to_string(),
    );
    metadata.insert(
        keys::ADMIN_PORT.to_string(),
        overrides
            .admin_port
            .unwrap_or(load_balancer.admin_port)
            .to_string(),
    );

    insert_launch_parameters(
        &mut metadata,
        overrides,
        &load_balancer.jvm_parameters,
        &load_balancer.main_parameters,
    );
    metadata
}

fn insert_launch_parameters(
    metadata: &mut BTreeMap<String, String>,
    overrides: &InstanceOverrides,
    jvm_default: &str,
    main_default: &str,
) {
    let jvm = overrides.jvm_parameters.as_deref().unwrap_or(jvm_default);
    let main = overrides.main_parameters.as_deref().unwrap_or(main_default);
    insert_non_empty(metadata, keys::JVM_PARAMETERS, normalize_whitespace(jvm));
    insert_non_empty(metadata, keys::MAIN_PARAMETERS, normalize_whitespace(main));
}

fn insert_non_empty(metadata: &mut BTreeMap<String, String>, key: &str, value: String) {
    if !value.is_empty() {
        metadata.insert(key.to_string(), value);
    }
}

fn machine_type_reference(zone: &str, machine_type: &str) -> String {
    if machine_type.contains('/') {
        machine_type.to_string()
    } else {
        format!("zones/{}/machineTypes/{}", zone, machine_type)
    }
}

/// Collapses runs of whitespace, including newlines, into single spaces.
pub fn normalize_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Comma-joins list values, dropping blanks.
pub fn join_list(values: &[String]) -> String {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}
