use anyhow::Result;
use async_trait::async_trait;
use beacon_core::redis::{get_connection, RedisPool};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing;

use crate::{BusEvent, EventBus, Subscription, SUBSCRIBER_BUFFER};

/// Redis pub/sub backend. Events are JSON-marshaled `BusEvent` frames on a
/// channel named after the topic.
pub struct RedisBus {
    client: RedisPool,
}

impl RedisBus {
    pub fn new(client: RedisPool) -> Self {
        RedisBus { client }
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, topic: &str, event: BusEvent) -> Result<()> {
        let mut conn = get_connection(&self.client).await?;
        let payload = serde_json::to_string(&event)?;

        // The reply is the number of receivers; zero is fine (silent drop).
        redis::cmd("PUBLISH")
            .arg(topic)
            .arg(payload)
            .query_async::<i64>(&mut conn)
            .await?;

        Ok(())
    }

    async fn subscribe(&self, topic: &str, cancel: CancellationToken) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;

        let loop_topic = topic.to_string();
        let loop_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    msg = stream.next() => {
                        let Some(msg) = msg else { break };
                        let payload: String = match msg.get_payload() {
                            Ok(p) => p,
                            Err(e) => {
                                tracing::warn!("Unreadable pubsub payload on {}: {}", loop_topic, e);
                                continue;
                            }
                        };
                        match serde_json::from_str::<BusEvent>(&payload) {
                            Ok(event) => match tx.try_send(event) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    tracing::warn!(
                                        "Dropping event for slow subscriber on topic {}",
                                        loop_topic
                                    );
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => break,
                            },
                            Err(e) => {
                                tracing::warn!("Malformed bus event on {}: {}", loop_topic, e);
                            }
                        }
                    }
                }
            }
            // Dropping tx here closes the subscriber channel exactly once.
            tracing::debug!("Redis subscription on {} closed", loop_topic);
        });

        Ok(Subscription::new(rx, cancel))
    }
}
