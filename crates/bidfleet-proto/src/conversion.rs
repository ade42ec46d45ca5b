use crate::v1;
use chrono::{TimeZone, Utc};

// ResourceKind

impl From<bidfleet_core::ResourceKind> for v1::ResourceKind {
    fn from(kind: bidfleet_core::ResourceKind) -> Self {
        match kind {
            bidfleet_core::ResourceKind::Bidder => v1::ResourceKind::Bidder,
            bidfleet_core::ResourceKind::LoadBalancer => v1::ResourceKind::LoadBalancer,
        }
    }
}

impl TryFrom<v1::ResourceKind> for bidfleet_core::ResourceKind {
    type Error = String;

    fn try_from(kind: v1::ResourceKind) -> Result<Self, String> {
        match kind {
            v1::ResourceKind::Bidder => Ok(bidfleet_core::ResourceKind::Bidder),
            v1::ResourceKind::LoadBalancer => Ok(bidfleet_core::ResourceKind::LoadBalancer),
            v1::ResourceKind::Unspecified => Err("resource kind is required".to_string()),
        }
    }
}

/// Decodes the raw enum value carried on request messages.
pub fn resource_kind_from_wire(value: i32) -> Result<bidfleet_core::ResourceKind, String> {
    v1::ResourceKind::try_from(value)
        .map_err(|_| format!("unknown resource kind {}", value))?
        .try_into()
}

// InstanceState

impl From<bidfleet_core::InstanceState> for v1::InstanceState {
    fn from(state: bidfleet_core::InstanceState) -> Self {
        match state {
            bidfleet_core::InstanceState::Starting => v1::InstanceState::Starting,
            bidfleet_core::InstanceState::Running => v1::InstanceState::Running,
            bidfleet_core::InstanceState::Stopping => v1::InstanceState::Stopping,
            bidfleet_core::InstanceState::Terminated => v1::InstanceState::Terminated,
            bidfleet_core::InstanceState::Error => v1::InstanceState::Error,
        }
    }
}

impl TryFrom<v1::InstanceState> for bidfleet_core::InstanceState {
    type Error = String;

    fn try_from(state: v1::InstanceState) -> Result<Self, String> {
        match state {
            v1::InstanceState::Starting => Ok(bidfleet_core::InstanceState::Starting),
            v1::InstanceState::Running => Ok(bidfleet_core::InstanceState::Running),
            v1::InstanceState::Stopping => Ok(bidfleet_core::InstanceState::Stopping),
            v1::InstanceState::Terminated => Ok(bidfleet_core::InstanceState::Terminated),
            v1::InstanceState::Error => Ok(bidfleet_core::InstanceState::Error),
            v1::InstanceState::Unspecified => Err("instance state is required".to_string()),
        }
    }
}

// InstanceOverrides

fn string_list(values: Option<Vec<String>>) -> Option<v1::StringList> {
    values.map(|values| v1::StringList { values })
}

fn port(value: Option<u32>, field: &str) -> Result<Option<u16>, String> {
    value
        .map(|raw| u16::try_from(raw).map_err(|_| format!("{} {} is not a valid port", field, raw)))
        .transpose()
}

impl From<bidfleet_core::InstanceOverrides> for v1::InstanceOverrides {
    fn from(overrides: bidfleet_core::InstanceOverrides) -> Self {
        Self {
            machine_type: overrides.machine_type,
            image: overrides.image,
            listen_port: overrides.listen_port.map(u32::from),
            admin_port: overrides.admin_port.map(u32::from),
            jvm_parameters: overrides.jvm_parameters,
            main_parameters: overrides.main_parameters,
            bid_interceptors: string_list(overrides.bid_interceptors),
            click_interceptors: string_list(overrides.click_interceptors),
            impression_interceptors: string_list(overrides.impression_interceptors),
        }
    }
}

impl TryFrom<v1::InstanceOverrides> for bidfleet_core::InstanceOverrides {
    type Error = String;

    fn try_from(overrides: v1::InstanceOverrides) -> Result<Self, String> {
        Ok(Self {
            listen_port: port(overrides.listen_port, "listen_port")?,
            admin_port: port(overrides.admin_port, "admin_port")?,
            machine_type: overrides.machine_type,
            image: overrides.image,
            jvm_parameters: overrides.jvm_parameters,
            main_parameters: overrides.main_parameters,
            bid_interceptors: overrides.bid_interceptors.map(|list| list.values),
            click_interceptors: overrides.click_interceptors.map(|list| list.values),
            impression_interceptors: overrides.impression_interceptors.map(|list| list.values),
        })
    }
}

// ResourceSnapshot

impl From<bidfleet_core::ResourceSnapshot> for v1::ResourceSnapshot {
    fn from(snapshot: bidfleet_core::ResourceSnapshot) -> Self {
        Self {
            kind: v1::ResourceKind::from(snapshot.kind) as i32,
            name: snapshot.name,
            zone: snapshot.zone,
            state: v1::InstanceState::from(snapshot.state) as i32,
            raw_status: snapshot.raw_status,
            machine_type: snapshot.machine_type,
            internal_ip: snapshot.internal_ip,
            external_ip: snapshot.external_ip,
            observed_at_millis: snapshot.observed_at.timestamp_millis(),
        }
    }
}

impl TryFrom<v1::ResourceSnapshot> for bidfleet_core::ResourceSnapshot {
    type Error = String;

    fn try_from(snapshot: v1::ResourceSnapshot) -> Result<Self, String> {
        let state = v1::InstanceState::try_from(snapshot.state)
            .map_err(|_| format!("unknown instance state {}", snapshot.state))?
            .try_into()?;
        let observed_at = Utc
            .timestamp_millis_opt(snapshot.observed_at_millis)
            .single()
            .ok_or_else(|| format!("invalid timestamp {}", snapshot.observed_at_millis))?;

        Ok(Self {
            kind: resource_kind_from_wire(snapshot.kind)?,
            name: snapshot.name,
            zone: snapshot.zone,
            state,
            raw_status: snapshot.raw_status,
            machine_type: snapshot.machine_type,
            internal_ip: snapshot.internal_ip,
            external_ip: snapshot.external_ip,
            observed_at,
        })
    }
}
