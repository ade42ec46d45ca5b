pub mod features;
pub mod server;
pub mod shared;

pub use shared::config::{ControlPlaneConfig, LifecycleSettings};
pub use shared::error::{ControlPlaneError, ControlPlaneResult};
