use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing;
use uuid::Uuid;

use crate::{BusEvent, EventBus, Subscription, SUBSCRIBER_BUFFER};

type TopicMap = HashMap<String, Vec<TopicSubscriber>>;

struct TopicSubscriber {
    id: Uuid,
    tx: mpsc::Sender<BusEvent>,
}

/// In-process backend: a mutex-guarded topic registry. The lock is held only
/// for registry mutation and the subscriber snapshot, never across a send.
#[derive(Default)]
pub struct InProcessBus {
    topics: Arc<Mutex<TopicMap>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(topics: &Mutex<TopicMap>) -> std::sync::MutexGuard<'_, TopicMap> {
        topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventBus for InProcessBus {
    async fn publish(&self, topic: &str, event: BusEvent) -> Result<()> {
        let senders: Vec<(Uuid, mpsc::Sender<BusEvent>)> = {
            let map = Self::lock(&self.topics);
            match map.get(topic) {
                Some(subs) => subs.iter().map(|s| (s.id, s.tx.clone())).collect(),
                // No listeners: at-most-once means the event just disappears.
                None => return Ok(()),
            }
        };

        for (id, tx) in senders {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        "Dropping event {} for slow subscriber {} on topic {}",
                        event.event_type,
                        id,
                        topic
                    );
                }
                // Subscriber is mid-unregistration; the watcher cleans it up.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str, cancel: CancellationToken) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = Uuid::new_v4();

        {
            let mut map = Self::lock(&self.topics);
            map.entry(topic.to_string())
                .or_default()
                .push(TopicSubscriber { id, tx });
        }

        tracing::debug!("Subscriber {} registered on topic {}", id, topic);

        let topics = Arc::clone(&self.topics);
        let watch_topic = topic.to_string();
        let watch_cancel = cancel.clone();
        tokio::spawn(async move {
            watch_cancel.cancelled().await;
            let mut map = InProcessBus::lock(&topics);
            if let Some(subs) = map.get_mut(&watch_topic) {
                // Dropping the sender closes the subscriber channel.
                subs.retain(|s| s.id != id);
                if subs.is_empty() {
                    map.remove(&watch_topic);
                }
            }
            tracing::debug!("Subscriber {} removed from topic {}", id, watch_topic);
        });

        Ok(Subscription::new(rx, cancel))
    }
}
