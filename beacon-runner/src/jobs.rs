//! Background jobs: the scheduling pass that enumerates who is due for a
//! recurring notification, the consumer that re-verifies and delivers each
//! batch, and the daily retention purge.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use beacon_core::redpanda::produce_message;
use beacon_core::store::{NotificationStore, PresenceStore};
use beacon_core::types::{NewNotification, NotificationKind};
use beacon_core::{BeaconContext, EngineError};
use beacon_engine::{ActivityEstimator, DeliveryScheduler, Notifier};
use beacon_store::PgStore;
use chrono::{DateTime, Utc};
use rdkafka::consumer::Consumer;
use rdkafka::Message;
use serde::{Deserialize, Serialize};
use tracing;

pub const BATCH_TOPIC: &str = "beacon.delivery.batches";

/// Kinds delivered on a per-recipient schedule rather than in response to an
/// event.
const SCHEDULED_KINDS: &[NotificationKind] = &[NotificationKind::DailyReminder];

const PURGE_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// One unit of scheduled work on the wire. The consumer re-checks
/// eligibility for every listed recipient before sending, so a batch that
/// sits in the topic or gets redelivered cannot cause duplicates.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryBatch {
    pub kind: NotificationKind,
    pub recipients: Vec<String>,
    pub enumerated_at: DateTime<Utc>,
}

fn reminder_draft(recipient: &str, kind: NotificationKind) -> NewNotification {
    let (title, body) = match kind {
        NotificationKind::DailyReminder => (
            "Your daily check-in",
            "See what happened while you were away.",
        ),
        NotificationKind::WeeklyDigest => ("Your weekly digest", "The week's highlights, in one place."),
        _ => ("Notification", ""),
    };
    NewNotification {
        recipient: recipient.to_string(),
        kind,
        title: title.to_string(),
        body: body.to_string(),
        link: Some("/home".to_string()),
        causer_id: None,
        resource_id: None,
    }
}

/// Periodic scheduling pass: refresh activity estimates for recently active
/// recipients, enumerate who is due, and publish the population in batches.
pub async fn run_scheduler(ctx: BeaconContext, store: Arc<PgStore>) -> Result<()> {
    tracing::info!("Starting delivery scheduler");

    let interval = Duration::from_secs(ctx.config.scheduler.schedule_interval_secs);
    let estimator = ActivityEstimator::new(
        store.clone(),
        store.clone(),
        ctx.config.scheduler.presence_retention_days,
    );
    let scheduler = DeliveryScheduler::new(store.clone(), store.clone());

    loop {
        match schedule_pass(&ctx, &store, &estimator, &scheduler).await {
            Ok(_) => {
                tokio::time::sleep(interval).await;
            }
            Err(e) => {
                tracing::error!("Error in scheduling pass: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

async fn schedule_pass(
    ctx: &BeaconContext,
    store: &Arc<PgStore>,
    estimator: &ActivityEstimator,
    scheduler: &DeliveryScheduler,
) -> Result<()> {
    let now = Utc::now();
    let batch_size = ctx.config.scheduler.batch_size.max(1);

    let active = store
        .active_recipients_since(now - chrono::Duration::hours(24))
        .await?;

    for &kind in SCHEDULED_KINDS {
        for recipient in &active {
            match estimator.refresh(recipient, kind, now).await {
                Ok(_) => {}
                Err(EngineError::NoPresenceData) => {
                    tracing::debug!("No presence data for {}, skipping estimate", recipient);
                }
                Err(e) => {
                    tracing::warn!("Failed to refresh estimate for {}: {}", recipient, e);
                }
            }
        }

        let eligible = scheduler.eligible_now(kind, now, None).await?;
        if eligible.is_empty() {
            continue;
        }

        tracing::info!(
            "{} recipients due for {} notifications",
            eligible.len(),
            kind.as_str()
        );

        for chunk in eligible.chunks(batch_size) {
            let batch = DeliveryBatch {
                kind,
                recipients: chunk.to_vec(),
                enumerated_at: now,
            };
            let payload = serde_json::to_vec(&batch)?;
            produce_message(&ctx.producer, BATCH_TOPIC, None, &payload).await?;
        }
    }

    Ok(())
}

/// Consumes delivery batches, re-verifies each against current state and
/// delivers to whoever is still eligible.
pub async fn run_batch_consumer(
    ctx: BeaconContext,
    store: Arc<PgStore>,
    notifier: Arc<Notifier>,
) -> Result<()> {
    tracing::info!("Starting delivery batch consumer");

    let consumer = ctx.create_consumer(Some("beacon-delivery"))?;
    consumer.subscribe(&[BATCH_TOPIC])?;

    let scheduler = DeliveryScheduler::new(store.clone(), store.clone());

    let mut error_count = 0u32;
    let mut last_error_log = std::time::Instant::now();

    loop {
        match consumer.recv().await {
            Ok(message) => {
                error_count = 0;
                if let Some(payload) = message.payload() {
                    if let Err(e) = handle_batch(&scheduler, &notifier, payload).await {
                        tracing::error!("Error processing delivery batch: {}", e);
                    }
                }
            }
            Err(e) => {
                error_count += 1;
                if last_error_log.elapsed().as_secs() >= 30 {
                    tracing::warn!(
                        "Error receiving batch from Redpanda (error count: {}): {}",
                        error_count,
                        e
                    );
                    last_error_log = std::time::Instant::now();
                }
                let backoff =
                    Duration::from_secs(1 << error_count.min(5)).min(Duration::from_secs(30));
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

async fn handle_batch(
    scheduler: &DeliveryScheduler,
    notifier: &Notifier,
    payload: &[u8],
) -> Result<()> {
    let batch: DeliveryBatch =
        serde_json::from_slice(payload).map_err(|e| anyhow!("Malformed batch: {}", e))?;

    let still_eligible = scheduler
        .eligible_now(batch.kind, Utc::now(), Some(&batch.recipients))
        .await?;

    let skipped = batch.recipients.len() - still_eligible.len();
    if skipped > 0 {
        tracing::debug!("{} recipients dropped out since enumeration", skipped);
    }

    for recipient in &still_eligible {
        let draft = reminder_draft(recipient, batch.kind);
        if let Err(e) = notifier.publish(draft, true, true).await {
            tracing::error!("Failed to deliver to {}: {}", recipient, e);
        }
    }

    if !still_eligible.is_empty() {
        tracing::info!(
            "Delivered {} {} notifications",
            still_eligible.len(),
            batch.kind.as_str()
        );
    }

    Ok(())
}

/// Daily retention sweep over read notifications and raw presence samples.
pub async fn run_purge(ctx: BeaconContext, store: Arc<PgStore>) -> Result<()> {
    tracing::info!("Starting retention purge job");

    loop {
        let now = Utc::now();

        match store
            .purge_read_older_than(
                now - chrono::Duration::days(ctx.config.scheduler.notification_retention_days),
            )
            .await
        {
            Ok(purged) if purged > 0 => {
                tracing::info!("Purged {} read notifications", purged);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Notification purge failed: {}", e);
            }
        }

        match store
            .purge_older_than(
                now - chrono::Duration::days(ctx.config.scheduler.presence_retention_days),
            )
            .await
        {
            Ok(purged) if purged > 0 => {
                tracing::info!("Purged {} presence samples", purged);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Presence purge failed: {}", e);
            }
        }

        tokio::time::sleep(Duration::from_secs(PURGE_INTERVAL_SECS)).await;
    }
}
