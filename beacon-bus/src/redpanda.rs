use anyhow::Result;
use async_trait::async_trait;
use beacon_core::config::RedpandaConfig;
use beacon_core::redpanda::{create_consumer, produce_message, KafkaProducer};
use rdkafka::consumer::Consumer;
use rdkafka::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing;
use uuid::Uuid;

use crate::{BusEvent, EventBus, Subscription, SUBSCRIBER_BUFFER};

/// Redpanda/Kafka backend. Every subscription gets its own consumer with a
/// fresh group id so each subscriber sees every event on the topic.
pub struct RedpandaBus {
    producer: KafkaProducer,
    config: RedpandaConfig,
}

impl RedpandaBus {
    pub fn new(producer: KafkaProducer, config: RedpandaConfig) -> Self {
        RedpandaBus { producer, config }
    }
}

#[async_trait]
impl EventBus for RedpandaBus {
    async fn publish(&self, topic: &str, event: BusEvent) -> Result<()> {
        let payload = serde_json::to_vec(&event)?;
        produce_message(&self.producer, topic, None, &payload).await
    }

    async fn subscribe(&self, topic: &str, cancel: CancellationToken) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        let group = format!("beacon-bus-{}", Uuid::new_v4());
        let consumer = create_consumer(&self.config, Some(&group))?;
        consumer.subscribe(&[topic])?;

        let loop_topic = topic.to_string();
        let loop_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    result = consumer.recv() => {
                        let message = match result {
                            Ok(m) => m,
                            Err(e) => {
                                tracing::warn!("Error receiving from topic {}: {}", loop_topic, e);
                                continue;
                            }
                        };
                        let Some(payload) = message.payload() else { continue };
                        match serde_json::from_slice::<BusEvent>(payload) {
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
            tracing::debug!("Redpanda subscription on {} closed", loop_topic);
        });

        Ok(Subscription::new(rx, cancel))
    }
}
