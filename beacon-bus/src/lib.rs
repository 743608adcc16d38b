//! Topic-keyed publish/subscribe with interchangeable backends.
//!
//! Semantics are at-most-once, best-effort: a topic with zero subscribers
//! silently drops published events, and a slow subscriber loses events rather
//! than blocking the publisher.

pub mod memory;
pub mod redis;
pub mod redpanda;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use beacon_core::BeaconContext;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

pub use memory::InProcessBus;
pub use redis::RedisBus;
pub use redpanda::RedpandaBus;

/// Per-subscriber buffer depth. A subscriber that falls this far behind
/// starts losing events.
pub const SUBSCRIBER_BUFFER: usize = 32;

/// The wire frame pushed to live subscribers of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEvent {
    pub event_type: String,
    pub data: String,
}

impl BusEvent {
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        BusEvent {
            event_type: event_type.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, event: BusEvent) -> Result<()>;

    /// Registers a subscriber on `topic`. The subscription lives until
    /// `cancel` fires or the returned handle is dropped, whichever comes
    /// first; either path unregisters and closes exactly one channel.
    async fn subscribe(&self, topic: &str, cancel: CancellationToken) -> Result<Subscription>;
}

/// A live subscription. Dropping it cancels the underlying token, which
/// deterministically unregisters the subscriber from its backend.
pub struct Subscription {
    rx: mpsc::Receiver<BusEvent>,
    _guard: DropGuard,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<BusEvent>, cancel: CancellationToken) -> Self {
        Subscription {
            rx,
            _guard: cancel.drop_guard(),
        }
    }

    pub async fn recv(&mut self) -> Option<BusEvent> {
        self.rx.recv().await
    }
}

impl futures_util::Stream for Subscription {
    type Item = BusEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Builds the backend selected by `BUS_BACKEND`.
pub fn create_bus(ctx: &BeaconContext) -> Result<Arc<dyn EventBus>> {
    match ctx.config.scheduler.bus_backend.as_str() {
        "memory" => Ok(Arc::new(InProcessBus::new())),
        "redis" => Ok(Arc::new(RedisBus::new(ctx.redis_pool.clone()))),
        "redpanda" => Ok(Arc::new(RedpandaBus::new(
            ctx.producer.clone(),
            ctx.config.redpanda.clone(),
        ))),
        other => Err(anyhow!("unknown bus backend: {}", other)),
    }
}
