use crate::features::notifications::repo::NotificationPublisher;
use crate::features::observability::controller::global_observability_controller;
use bidfleet_core::{Instance, InstanceState, NotificationEvent, ResourceKind, ResourceSnapshot};
use std::sync::Arc;
use tracing::{info, warn};

/// Publishes the lifecycle of one instance for the duration of one create or
/// delete call. Consecutive identical states are published once.
pub struct LifecycleNotifier {
    publisher: Arc<dyn NotificationPublisher>,
    tenant_id: String,
    kind: ResourceKind,
    zone: String,
    name: String,
    last: Option<InstanceState>,
    published: Vec<InstanceState>,
}

impl LifecycleNotifier {
    pub fn new(
        publisher: Arc<dyn NotificationPublisher>,
        tenant_id: impl Into<String>,
        kind: ResourceKind,
        zone: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            tenant_id: tenant_id.into(),
            kind,
            zone: zone.into(),
            name: name.into(),
            last: None,
            published: Vec::new(),
        }
    }

    pub fn last_state(&self) -> Option<InstanceState> {
        self.last
    }

    pub fn published(&self) -> &[InstanceState] {
        &self.published
    }

    /// Publishes a state the controller asserts ahead of the backend.
    pub async fn announce(&mut self, state: InstanceState) -> bool {
        let snapshot =
            ResourceSnapshot::synthesized(self.kind, self.zone.clone(), self.name.clone(), state);
        self.publish(snapshot).await
    }

    /// Publishes the state derived from a backend read, if it changed.
    pub async fn observe(&mut self, instance: &Instance) -> bool {
        self.publish(ResourceSnapshot::observed(self.kind, instance))
            .await
    }

    /// Returns whether an event was emitted. Publisher failures are logged
    /// and do not fail the lifecycle flow.
    pub async fn publish(&mut self, snapshot: ResourceSnapshot) -> bool {
        let state = snapshot.state;
        if self.last == Some(state) {
            return false;
        }

        if let Some(previous) = self.last {
            if !previous.may_precede(state) {
                warn!(
                    instance = %self.name,
                    zone = %self.zone,
                    from = %previous,
                    to = %state,
                    "Unexpected lifecycle transition"
                );
            }
        }

        let topic = self.kind.topic();
        let event = NotificationEvent::new(self.tenant_id.clone(), topic, snapshot);
        let metrics = global_observability_controller();

        match self.publisher.notify(event).await {
            Ok(()) => {
                metrics.record_notification(topic, state);
                info!(
                    tenant_id = %self.tenant_id,
                    instance = %self.name,
                    zone = %self.zone,
                    state = %state,
                    "Published lifecycle state"
                );
            }
            Err(error) => {
                metrics.record_notification_failure(topic);
                warn!(
                    tenant_id = %self.tenant_id,
                    instance = %self.name,
                    state = %state,
                    error = %error,
                    "Failed to publish lifecycle state"
                );
            }
        }

        self.last = Some(state);
        self.published.push(state);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::notifications::repo::InMemoryNotificationPublisher;
    use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
    use async_trait::async_trait;
    use bidfleet_core::instance_link;
    use std::collections::{BTreeMap, BTreeSet};

    const ZONE: &str = "rtb-us-east1-a";

    struct RejectingPublisher;

    #[async_trait]
    impl NotificationPublisher for RejectingPublisher {
        async fn notify(&self, _event: NotificationEvent) -> ControlPlaneResult<()> {
            Err(ControlPlaneError::Unknown("topic unavailable".to_string()))
        }
    }

    fn instance(status: &str) -> Instance {
        Instance {
            name: "bidder-1".to_string(),
            zone: ZONE.to_string(),
            status: status.to_string(),
            machine_type: "standard-1-cpu".to_string(),
            tags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            internal_ip: None,
            external_ip: None,
            self_link: instance_link(ZONE, "bidder-1"),
        }
    }

    #[tokio::test]
    async fn test_consecutive_states_are_collapsed() {
        let publisher = Arc::new(InMemoryNotificationPublisher::new());
        let mut notifier =
            LifecycleNotifier::new(publisher.clone(), "acme", ResourceKind::Bidder, ZONE, "bidder-1");

        assert!(notifier.announce(InstanceState::Starting).await);
        assert!(!notifier.observe(&instance("PROVISIONING")).await);
        assert!(!notifier.observe(&instance("STAGING")).await);
        assert!(notifier.observe(&instance("RUNNING")).await);
        assert!(!notifier.observe(&instance("RUNNING")).await);

        assert_eq!(
            publisher.states_for(ZONE, "bidder-1"),
            vec![InstanceState::Starting, InstanceState::Running]
        );
        assert_eq!(notifier.last_state(), Some(InstanceState::Running));
    }

    #[tokio::test]
    async fn test_events_carry_tenant_and_topic() {
        let publisher = Arc::new(InMemoryNotificationPublisher::new());
        let mut notifier = LifecycleNotifier::new(
            publisher.clone(),
            "acme",
            ResourceKind::LoadBalancer,
            ZONE,
            "load-balancer-1",
        );

        notifier.announce(InstanceState::Stopping).await;

        let history = publisher.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tenant_id, "acme");
        assert_eq!(history[0].topic, "load-balancer-instances");
    }

    #[tokio::test]
    async fn test_publisher_failure_does_not_stop_the_flow() {
        let mut notifier = LifecycleNotifier::new(
            Arc::new(RejectingPublisher),
            "acme",
            ResourceKind::Bidder,
            ZONE,
            "bidder-1",
        );

        assert!(notifier.announce(InstanceState::Stopping).await);
        assert!(notifier.announce(InstanceState::Terminated).await);
        assert_eq!(
            notifier.published(),
            &[InstanceState::Stopping, InstanceState::Terminated]
        );
    }
}
