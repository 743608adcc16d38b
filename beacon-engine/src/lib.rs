//! The delivery engine: decides when a recipient should receive a recurring
//! notification, and ties persistence, dedup, fan-out and push dispatch into
//! one facade.

pub mod estimator;
pub mod orchestrator;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod support;

pub use estimator::{best_send_minute, ActivityEstimator};
pub use orchestrator::{Notifier, COUNTER_EVENT, PAYLOAD_EVENT};
pub use scheduler::{minutes_since_midnight, utc_midnight, DeliveryScheduler};
