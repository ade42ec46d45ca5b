pub mod compute;
pub mod disk_provisioning;
pub mod instance_lifecycle;
pub mod instance_spec;
pub mod notifications;
pub mod observability;
pub mod operations;
pub mod tenant_config;
