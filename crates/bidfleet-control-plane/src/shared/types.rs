use std::sync::Arc;
use tokio::sync::watch;

pub use bidfleet_core::{
    Instance, InstanceOverrides, InstanceSpec, InstanceState, ResourceKind, ResourceSnapshot,
};

/// Request to provision a new bidder or load balancer
#[derive(Debug, Clone)]
pub struct CreateInstanceRequest {
    pub tenant_id: String,
    pub kind: ResourceKind,
    pub zone: String,
    /// Generated as `<kind>-<epoch-millis>` when absent.
    pub name: Option<String>,
    pub overrides: InstanceOverrides,
    pub requester: String,
}

/// Request to tear down an instance
#[derive(Debug, Clone)]
pub struct DeleteInstanceRequest {
    pub tenant_id: String,
    pub kind: ResourceKind,
    pub zone: String,
    pub name: String,
}

/// Request to read the current state of an instance
#[derive(Debug, Clone)]
pub struct GetInstanceRequest {
    pub tenant_id: String,
    pub kind: ResourceKind,
    pub zone: String,
    pub name: String,
}

/// Result of a create call that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    pub name: String,
    pub zone: String,
    pub disk_name: String,
    /// Last state published for the instance.
    pub state: InstanceState,
    /// Polling stopped on request before the instance reported RUNNING.
    pub cancelled: bool,
}

/// Result of a delete call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub name: String,
    pub zone: String,
    /// The instance did not exist, or vanished while the delete was in flight.
    pub already_absent: bool,
}

/// Cooperative cancellation shared between a caller and one create flow.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        while !*receiver.borrow_and_update() {
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
