use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use bidfleet_core::PlatformConfig;

use crate::shared::error::{ControlPlaneError, ControlPlaneResult};

/// Timeouts and policies applied to every create/delete flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub operation_timeout: Duration,
    pub disk_timeout: Duration,
    pub poll_interval: Duration,
    /// Delete a freshly created boot disk when the instance create fails.
    pub cleanup_orphaned_disks: bool,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(120),
            disk_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(2_000),
            cleanup_orphaned_disks: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub control_plane_addr: SocketAddr,
    pub metrics_addr: SocketAddr,
    pub lifecycle: LifecycleSettings,
    pub tenant_config_path: Option<PathBuf>,
    pub tenant_refresh_interval: Duration,
    pub bootstrap_script_path: Option<PathBuf>,
    pub platform_name: Option<String>,
}

impl ControlPlaneConfig {
    pub fn from_env() -> ControlPlaneResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> ControlPlaneResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = LifecycleSettings::default();

        Ok(Self {
            control_plane_addr: parse_or(&lookup, "CONTROL_PLANE_ADDR", "127.0.0.1:50051")?,
            metrics_addr: parse_or(&lookup, "METRICS_ADDR", "127.0.0.1:9100")?,
            lifecycle: LifecycleSettings {
                operation_timeout: Duration::from_secs(parse_or(
                    &lookup,
                    "OPERATION_TIMEOUT_SECS",
                    &defaults.operation_timeout.as_secs().to_string(),
                )?),
                disk_timeout: Duration::from_secs(parse_or(
                    &lookup,
                    "DISK_TIMEOUT_SECS",
                    &defaults.disk_timeout.as_secs().to_string(),
                )?),
                poll_interval: Duration::from_millis(parse_or(
                    &lookup,
                    "POLL_INTERVAL_MS",
                    &defaults.poll_interval.as_millis().to_string(),
                )?),
                cleanup_orphaned_disks: parse_or(&lookup, "CLEANUP_ORPHANED_DISKS", "true")?,
            },
            tenant_config_path: non_empty(&lookup, "TENANT_CONFIG_PATH").map(PathBuf::from),
            tenant_refresh_interval: Duration::from_secs(parse_or(
                &lookup,
                "TENANT_REFRESH_SECS",
                "60",
            )?),
            bootstrap_script_path: non_empty(&lookup, "BOOTSTRAP_SCRIPT_PATH").map(PathBuf::from),
            platform_name: non_empty(&lookup, "PLATFORM_NAME"),
        })
    }

    /// Platform defaults with the bootstrap script loaded from disk. Size
    /// limits are enforced later, when the spec builder is constructed.
    pub fn platform_config(&self) -> ControlPlaneResult<PlatformConfig> {
        let mut platform = PlatformConfig::default();

        if let Some(name) = &self.platform_name {
            platform.platform = name.clone();
        }

        if let Some(path) = &self.bootstrap_script_path {
            platform.bootstrap_script = std::fs::read_to_string(path).map_err(|e| {
                ControlPlaneError::ValidationError(format!(
                    "Failed to read bootstrap script {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }

        Ok(platform)
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|value| !value.trim().is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: &str) -> ControlPlaneResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = non_empty(lookup, key).unwrap_or_else(|| default.to_string());
    raw.trim().parse::<T>().map_err(|e| {
        ControlPlaneError::ValidationError(format!("Invalid value for {}: {} ({})", key, raw, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = ControlPlaneConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.control_plane_addr.port(), 50051);
        assert_eq!(config.metrics_addr.port(), 9100);
        assert_eq!(config.lifecycle, LifecycleSettings::default());
        assert_eq!(config.tenant_refresh_interval, Duration::from_secs(60));
        assert!(config.tenant_config_path.is_none());
        assert!(config.platform_name.is_none());
    }

    #[test]
    fn test_overrides_from_environment() {
        let config = ControlPlaneConfig::from_lookup(lookup_from(&[
            ("OPERATION_TIMEOUT_SECS", "30"),
            ("POLL_INTERVAL_MS", "250"),
            ("CLEANUP_ORPHANED_DISKS", "false"),
            ("TENANT_CONFIG_PATH", "/etc/bidfleet/tenants.json"),
            ("PLATFORM_NAME", "rtb"),
        ]))
        .unwrap();

        assert_eq!(config.lifecycle.operation_timeout, Duration::from_secs(30));
        assert_eq!(config.lifecycle.poll_interval, Duration::from_millis(250));
        assert!(!config.lifecycle.cleanup_orphaned_disks);
        assert_eq!(
            config.tenant_config_path,
            Some(PathBuf::from("/etc/bidfleet/tenants.json"))
        );
        assert_eq!(config.platform_name.as_deref(), Some("rtb"));
    }

    #[test]
    fn test_invalid_value_is_validation_error() {
        let result = ControlPlaneConfig::from_lookup(lookup_from(&[("DISK_TIMEOUT_SECS", "soon")]));
        assert!(matches!(result, Err(ControlPlaneError::ValidationError(_))));
    }

    #[test]
    fn test_platform_config_reads_bootstrap_script() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "#!/bin/bash\necho up").unwrap();

        let config = ControlPlaneConfig::from_lookup(lookup_from(&[
            ("BOOTSTRAP_SCRIPT_PATH", file.path().to_str().unwrap()),
            ("PLATFORM_NAME", "rtb"),
        ]))
        .unwrap();

        let platform = config.platform_config().unwrap();
        assert_eq!(platform.platform, "rtb");
        assert_eq!(platform.bootstrap_script, "#!/bin/bash\necho up");
    }

    #[test]
    fn test_platform_config_missing_script_fails() {
        let config = ControlPlaneConfig::from_lookup(lookup_from(&[(
            "BOOTSTRAP_SCRIPT_PATH",
            "/nonexistent/bootstrap.sh",
        )]))
        .unwrap();

        assert!(config.platform_config().is_err());
    }
}
