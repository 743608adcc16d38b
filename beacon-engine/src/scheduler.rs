use std::sync::Arc;

use beacon_core::store::{EstimateStore, NotificationStore};
use beacon_core::types::NotificationKind;
use beacon_core::EngineError;
use chrono::{DateTime, NaiveTime, Timelike, Utc};

pub fn minutes_since_midnight(at: DateTime<Utc>) -> u16 {
    (at.hour() * 60 + at.minute()) as u16
}

pub fn utc_midnight(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Gates which recipients may receive a recurring notification right now.
pub struct DeliveryScheduler {
    notifications: Arc<dyn NotificationStore>,
    estimates: Arc<dyn EstimateStore>,
}

impl DeliveryScheduler {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        estimates: Arc<dyn EstimateStore>,
    ) -> Self {
        DeliveryScheduler {
            notifications,
            estimates,
        }
    }

    /// Every recipient whose estimated send-minute has passed for `as_of`
    /// and who has not already received a `kind` notification since the most
    /// recent UTC midnight. At most one recurring notification of a kind per
    /// calendar day; a candidate subset further restricts the result.
    ///
    /// The already-sent check consults both live rows and the delivery log.
    /// Kinds that delete themselves on read would otherwise reopen
    /// eligibility the moment the recipient reads today's notification.
    ///
    /// This gate runs twice per delivery: once to enumerate the day's
    /// population, and again per batch immediately before sending, so a
    /// retried or delayed batch re-checks against fresh state.
    pub async fn eligible_now(
        &self,
        kind: NotificationKind,
        as_of: DateTime<Utc>,
        candidates: Option<&[String]>,
    ) -> Result<Vec<String>, EngineError> {
        let minute = minutes_since_midnight(as_of);
        let midnight = utc_midnight(as_of);
        let due = self.estimates.recipients_due_by(kind, minute).await?;
        let already_notified = self
            .notifications
            .recipients_notified_since(kind, midnight)
            .await?;
        let already_delivered = self
            .notifications
            .recipients_delivered_since(kind, midnight)
            .await?;

        Ok(due
            .into_iter()
            .filter(|recipient| {
                !already_notified.contains(recipient) && !already_delivered.contains(recipient)
            })
            .filter(|recipient| {
                candidates.map_or(true, |set| set.iter().any(|c| c == recipient))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Notifier;
    use crate::support::MemoryStore;
    use beacon_bus::{EventBus, InProcessBus};
    use beacon_core::types::NewNotification;
    use chrono::{Duration, TimeZone};

    const KIND: NotificationKind = NotificationKind::DailyReminder;

    fn reminder(recipient: &str) -> NewNotification {
        NewNotification {
            recipient: recipient.to_string(),
            kind: KIND,
            title: "Daily reminder".to_string(),
            body: "Time to check in".to_string(),
            link: None,
            causer_id: None,
            resource_id: None,
        }
    }

    fn scheduler(store: &Arc<MemoryStore>) -> DeliveryScheduler {
        DeliveryScheduler::new(store.clone(), store.clone())
    }

    #[tokio::test]
    async fn eligibility_is_monotonic_over_the_day() {
        let store = MemoryStore::shared();
        let noon_estimate = 720u16;
        store.seed_estimate("alice", KIND, noon_estimate);
        let scheduler = scheduler(&store);

        // Before the send-minute: excluded.
        let before = Utc.with_ymd_and_hms(2026, 3, 4, 11, 59, 0).unwrap();
        assert!(scheduler
            .eligible_now(KIND, before, None)
            .await
            .unwrap()
            .is_empty());

        // From the send-minute until midnight: included.
        for hour in [12u32, 15, 23] {
            let at = Utc.with_ymd_and_hms(2026, 3, 4, hour, 0, 0).unwrap();
            assert_eq!(
                scheduler.eligible_now(KIND, at, None).await.unwrap(),
                vec!["alice".to_string()],
                "hour {}",
                hour
            );
        }
    }

    #[tokio::test]
    async fn a_recipient_already_notified_today_is_never_eligible() {
        let store = MemoryStore::shared();
        store.seed_estimate("alice", KIND, 0);
        let scheduler = scheduler(&store);

        let now = Utc.with_ymd_and_hms(2026, 3, 4, 23, 59, 0).unwrap();
        store.seed_notification_at(reminder("alice"), now - Duration::hours(2));

        assert!(scheduler
            .eligible_now(KIND, now, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn yesterdays_notification_does_not_block_today() {
        let store = MemoryStore::shared();
        store.seed_estimate("alice", KIND, 600);
        let scheduler = scheduler(&store);

        let now = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();
        store.seed_notification_at(reminder("alice"), now - Duration::days(1));

        assert_eq!(
            scheduler.eligible_now(KIND, now, None).await.unwrap(),
            vec!["alice".to_string()]
        );
    }

    #[tokio::test]
    async fn a_candidate_subset_restricts_the_result() {
        let store = MemoryStore::shared();
        store.seed_estimate("alice", KIND, 0);
        store.seed_estimate("bob", KIND, 0);
        let scheduler = scheduler(&store);

        let now = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();
        let batch = vec!["bob".to_string()];

        assert_eq!(
            scheduler.eligible_now(KIND, now, Some(&batch)).await.unwrap(),
            vec!["bob".to_string()]
        );
    }

    #[tokio::test]
    async fn rerunning_a_batch_after_delivery_finds_nobody() {
        // The re-verification step that makes wholesale batch retries safe.
        let store = MemoryStore::shared();
        store.seed_estimate("alice", KIND, 0);
        let scheduler = scheduler(&store);

        let now = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();
        let batch = vec!["alice".to_string()];

        let first = scheduler.eligible_now(KIND, now, Some(&batch)).await.unwrap();
        assert_eq!(first, vec!["alice".to_string()]);
        // Delivery happens between the two runs.
        store.seed_notification_at(reminder("alice"), now);

        let second = scheduler.eligible_now(KIND, now, Some(&batch)).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn a_read_reminder_does_not_come_back_the_same_day() {
        let store = MemoryStore::shared();
        store.seed_estimate("alice", KIND, 0);
        let scheduler = scheduler(&store);
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new());
        let notifier = Notifier::new(store.clone(), store.clone(), bus, vec![]);

        let now = Utc::now();
        assert_eq!(
            scheduler.eligible_now(KIND, now, None).await.unwrap(),
            vec!["alice".to_string()]
        );

        let created = notifier.publish(reminder("alice"), true, false).await.unwrap();
        assert!(scheduler.eligible_now(KIND, now, None).await.unwrap().is_empty());

        // Reading a reminder deletes its row. The delivery log still holds.
        notifier.mark_read(created.id, Some("alice")).await.unwrap();
        assert!(store
            .list_for_recipient("alice", false, None, 10)
            .await
            .unwrap()
            .is_empty());
        assert!(scheduler.eligible_now(KIND, now, None).await.unwrap().is_empty());

        // The next UTC day reopens eligibility.
        assert_eq!(
            scheduler
                .eligible_now(KIND, now + Duration::days(1), None)
                .await
                .unwrap(),
            vec!["alice".to_string()]
        );
    }

    #[test]
    fn midnight_and_minute_helpers_agree() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 13, 45, 12).unwrap();
        assert_eq!(minutes_since_midnight(at), 13 * 60 + 45);
        assert_eq!(
            utc_midnight(at),
            Utc.with_ymd_and_hms(2026, 3, 4, 0, 0, 0).unwrap()
        );
    }
}
