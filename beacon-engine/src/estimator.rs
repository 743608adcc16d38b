use std::sync::Arc;

use beacon_core::store::{EstimateStore, PresenceStore};
use beacon_core::types::NotificationKind;
use beacon_core::EngineError;
use chrono::{DateTime, Duration, Timelike, Utc};
use tracing;

pub const MINUTES_PER_DAY: usize = 1440;
pub const WINDOW_MINUTES: usize = 30;
pub const WINDOW_STEP_MINUTES: usize = 15;

/// The minute of the UTC day at which the given presence samples cluster
/// most densely, or `None` when there are no samples.
///
/// A 1440-bucket minute-of-day histogram is scanned with a 30-minute window
/// at a 15-minute step; the result is the midpoint of the densest window,
/// earliest window winning ties. Windows that would extend past minute 1439
/// are skipped rather than wrapped into the next day, so activity
/// concentrated around midnight is undercounted. That matches the historical
/// behavior of this system and is pinned by a test below.
pub fn best_send_minute(samples: &[DateTime<Utc>]) -> Option<u16> {
    if samples.is_empty() {
        return None;
    }

    let mut buckets = [0u32; MINUTES_PER_DAY];
    for sample in samples {
        let minute = (sample.hour() * 60 + sample.minute()) as usize;
        buckets[minute] += 1;
    }

    let mut best_start = 0usize;
    let mut best_sum = 0u32;
    let mut start = 0usize;
    while start + WINDOW_MINUTES <= MINUTES_PER_DAY {
        let sum: u32 = buckets[start..start + WINDOW_MINUTES].iter().sum();
        if sum > best_sum {
            best_sum = sum;
            best_start = start;
        }
        start += WINDOW_STEP_MINUTES;
    }

    Some((best_start + WINDOW_MINUTES / 2) as u16)
}

/// Derives and stores per-recipient send-minute estimates from raw presence
/// samples.
pub struct ActivityEstimator {
    presence: Arc<dyn PresenceStore>,
    estimates: Arc<dyn EstimateStore>,
    retention: Duration,
}

impl ActivityEstimator {
    pub fn new(
        presence: Arc<dyn PresenceStore>,
        estimates: Arc<dyn EstimateStore>,
        retention_days: i64,
    ) -> Self {
        ActivityEstimator {
            presence,
            estimates,
            retention: Duration::days(retention_days),
        }
    }

    /// Recomputes the estimate for (recipient, kind) unless the stored one is
    /// younger than 24 hours. Returns whether a new estimate was stored.
    /// Fails with `NoPresenceData` when the recipient has no samples in the
    /// retained window; the caller decides whether that is skip or error.
    pub async fn refresh(
        &self,
        recipient: &str,
        kind: NotificationKind,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        if let Some(existing) = self.estimates.get(recipient, kind).await? {
            if now - existing.updated_at < Duration::hours(24) {
                tracing::debug!("Estimate for {} is fresh, skipping recompute", recipient);
                return Ok(false);
            }
        }

        let samples = self
            .presence
            .samples_for(recipient, now - self.retention)
            .await?;
        let send_minute = best_send_minute(&samples).ok_or(EngineError::NoPresenceData)?;

        self.estimates
            .upsert(recipient, kind, send_minute, now)
            .await?;

        tracing::debug!(
            "Estimated send minute {} for {} ({} samples)",
            send_minute,
            recipient,
            samples.len()
        );

        Ok(true)
    }
}
