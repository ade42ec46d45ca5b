use crate::shared::error::{ControlPlaneError, ControlPlaneResult};
use async_trait::async_trait;
use bidfleet_core::{InstanceState, NotificationEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

const TOPIC_CAPACITY: usize = 256;
const HISTORY_LIMIT: usize = 1024;

/// Pub/sub fan-out for lifecycle events. Must accept concurrent publishes
/// from independent lifecycle flows.
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn notify(&self, event: NotificationEvent) -> ControlPlaneResult<()>;
}

/// In-process topics backed by broadcast channels. The most recent events
/// are also kept in a bounded history for inspection; older ones are dropped.
#[derive(Clone)]
pub struct InMemoryNotificationPublisher {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<NotificationEvent>>>>,
    history: Arc<RwLock<VecDeque<NotificationEvent>>>,
    history_limit: usize,
}

impl InMemoryNotificationPublisher {
    pub fn new() -> Self {
        Self::with_history_limit(HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(VecDeque::new())),
            history_limit,
        }
    }

    pub fn subscribe(&self, topic: &str) -> ControlPlaneResult<broadcast::Receiver<NotificationEvent>> {
        let mut topics = self
            .topics
            .write()
            .map_err(|_| ControlPlaneError::Unknown("Lock poisoned".to_string()))?;
        Ok(topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe())
    }

    pub fn history(&self) -> Vec<NotificationEvent> {
        self.history
            .read()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// States published for one instance, in publish order.
    pub fn states_for(&self, zone: &str, name: &str) -> Vec<InstanceState> {
        self.history()
            .into_iter()
            .filter(|event| event.snapshot.zone == zone && event.snapshot.name == name)
            .map(|event| event.state())
            .collect()
    }
}

impl Default for InMemoryNotificationPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationPublisher for InMemoryNotificationPublisher {
    async fn notify(&self, event: NotificationEvent) -> ControlPlaneResult<()> {
        {
            let mut history = self
                .history
                .write()
                .map_err(|_| ControlPlaneError::Unknown("Lock poisoned".to_string()))?;
            history.push_back(event.clone());
            while history.len() > self.history_limit {
                history.pop_front();
            }
        }

        let topics = self
            .topics
            .read()
            .map_err(|_| ControlPlaneError::Unknown("Lock poisoned".to_string()))?;
        if let Some(sender) = topics.get(&event.topic) {
            // No live subscribers is not a failure.
            let _ = sender.send(event);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bidfleet_core::{ResourceKind, ResourceSnapshot};

    fn event(name: &str, state: InstanceState) -> NotificationEvent {
        NotificationEvent::new(
            "acme",
            ResourceKind::Bidder.topic(),
            ResourceSnapshot::synthesized(ResourceKind::Bidder, "rtb-us-east1-a", name, state),
        )
    }

    #[tokio::test]
    async fn test_subscribers_receive_events_for_their_topic() {
        let publisher = InMemoryNotificationPublisher::new();
        let mut bidders = publisher.subscribe(ResourceKind::Bidder.topic()).unwrap();
        let mut balancers = publisher
            .subscribe(ResourceKind::LoadBalancer.topic())
            .unwrap();

        publisher
            .notify(event("bidder-1", InstanceState::Starting))
            .await
            .unwrap();

        assert_eq!(bidders.recv().await.unwrap().state(), InstanceState::Starting);
        assert!(balancers.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_recorded() {
        let publisher = InMemoryNotificationPublisher::new();
        publisher
            .notify(event("bidder-1", InstanceState::Stopping))
            .await
            .unwrap();
        publisher
            .notify(event("bidder-2", InstanceState::Terminated))
            .await
            .unwrap();

        assert_eq!(publisher.history().len(), 2);
        assert_eq!(
            publisher.states_for("rtb-us-east1-a", "bidder-1"),
            vec![InstanceState::Stopping]
        );
    }

    #[tokio::test]
    async fn test_history_keeps_only_the_most_recent_events() {
        let publisher = InMemoryNotificationPublisher::with_history_limit(2);
        for name in ["bidder-1", "bidder-2", "bidder-3"] {
            publisher
                .notify(event(name, InstanceState::Starting))
                .await
                .unwrap();
        }

        let names: Vec<String> = publisher
            .history()
            .into_iter()
            .map(|event| event.snapshot.name)
            .collect();
        assert_eq!(names, vec!["bidder-2", "bidder-3"]);
    }
}
