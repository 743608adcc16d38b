use std::sync::Arc;

use beacon_bus::{BusEvent, EventBus, Subscription};
use beacon_core::store::{NotificationStore, PermissionStore};
use beacon_core::types::{NewNotification, Notification, NotificationKind};
use beacon_core::EngineError;
use beacon_push::{PushChannel, PushMessage};
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing;

/// Counter refresh frame. Carries no payload; clients re-fetch their unread
/// count when they see it.
pub const COUNTER_EVENT: &str = "notification.counter";

/// Full notification frame, data is the serialized notification.
pub const PAYLOAD_EVENT: &str = "notification";

pub fn topic_for(recipient: &str) -> String {
    format!("notifications.{}", recipient)
}

/// The single entry point for creating and mutating notifications. Every
/// mutation that changes what a recipient sees flows through here so that
/// persistence, live fan-out and push dispatch stay in step.
pub struct Notifier {
    store: Arc<dyn NotificationStore>,
    permissions: Arc<dyn PermissionStore>,
    bus: Arc<dyn EventBus>,
    channels: Vec<Arc<dyn PushChannel>>,
}

impl Notifier {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        permissions: Arc<dyn PermissionStore>,
        bus: Arc<dyn EventBus>,
        channels: Vec<Arc<dyn PushChannel>>,
    ) -> Self {
        Notifier {
            store,
            permissions,
            bus,
            channels,
        }
    }

    /// Creates and delivers a notification. `persist` stores it first; an
    /// ephemeral one only reaches subscribers currently connected. The
    /// counter frame goes out before push and before the payload frame, so a
    /// client that only tracks the badge never lags behind one that renders
    /// payloads.
    ///
    /// Bus and push failures are logged and swallowed; only persistence
    /// failures propagate.
    pub async fn publish(
        &self,
        draft: NewNotification,
        persist: bool,
        push_enabled: bool,
    ) -> Result<Notification, EngineError> {
        let notification = if persist {
            let notification = self.store.create(draft).await?;
            if notification.kind.recurring() {
                // The once-per-day guard reads this log, not the row, so the
                // cap holds even after the recipient reads and deletes it.
                self.store
                    .record_delivery(
                        &notification.recipient,
                        notification.kind,
                        notification.created_at,
                    )
                    .await?;
            }
            notification
        } else {
            ephemeral(draft)
        };

        let topic = topic_for(&notification.recipient);
        self.publish_event(&topic, BusEvent::new(COUNTER_EVENT, ""))
            .await;

        if push_enabled {
            self.push(&notification, persist).await;
        }

        self.publish_event(
            &topic,
            BusEvent::new(PAYLOAD_EVENT, notification.to_payload().to_string()),
        )
        .await;

        Ok(notification)
    }

    /// Marks a notification read, or deletes it outright for kinds that never
    /// exist in the read state.
    pub async fn mark_read(&self, id: i64, owner: Option<&str>) -> Result<(), EngineError> {
        let notification = self.store.get(id, owner).await?;
        if notification.kind.deleted_once_read() {
            self.store.delete(id, owner).await?;
        } else {
            self.store.mark_read(id, owner).await?;
        }
        self.refresh_counters(&notification.recipient).await;
        Ok(())
    }

    pub async fn mark_unread(&self, id: i64, owner: Option<&str>) -> Result<(), EngineError> {
        let notification = self.store.get(id, owner).await?;
        self.store.mark_unread(id, owner).await?;
        self.refresh_counters(&notification.recipient).await;
        Ok(())
    }

    /// Bulk read: kinds that never exist read are deleted, everything else
    /// is flipped to read. Returns the total number of rows touched.
    pub async fn mark_all_read(&self, recipient: &str) -> Result<u64, EngineError> {
        let doomed: Vec<NotificationKind> = NotificationKind::ALL
            .iter()
            .copied()
            .filter(|kind| kind.deleted_once_read())
            .collect();

        let deleted = self.store.delete_unread_of_kinds(recipient, &doomed).await?;
        let marked = self.store.mark_all_read(recipient).await?;

        let changed = deleted + marked;
        if changed > 0 {
            self.refresh_counters(recipient).await;
        }
        Ok(changed)
    }

    pub async fn delete(&self, id: i64, owner: Option<&str>) -> Result<(), EngineError> {
        let notification = self.store.get(id, owner).await?;
        self.store.delete(id, owner).await?;
        self.refresh_counters(&notification.recipient).await;
        Ok(())
    }

    /// Dedup query for event-driven callers that must not notify twice about
    /// the same resource and causer.
    pub async fn has_notification_for_resource_and_person(
        &self,
        kind: NotificationKind,
        causer: Option<&str>,
        resource: Option<&str>,
        max_age: Duration,
    ) -> Result<bool, EngineError> {
        Ok(self
            .store
            .exists_for_resource_and_causer(kind, causer, resource, max_age)
            .await?)
    }

    pub async fn unread_count(&self, recipient: &str) -> Result<i64, EngineError> {
        Ok(self.store.unread_count(recipient).await?)
    }

    /// A live stream of this recipient's frames.
    pub async fn subscribe(
        &self,
        recipient: &str,
        cancel: CancellationToken,
    ) -> Result<Subscription, EngineError> {
        Ok(self.bus.subscribe(&topic_for(recipient), cancel).await?)
    }

    async fn push(&self, notification: &Notification, persisted: bool) {
        // Badge numbers only make sense for stored notifications.
        let badge = if persisted {
            match self.store.unread_count(&notification.recipient).await {
                Ok(count) => Some(count.max(0) as u32),
                Err(e) => {
                    tracing::warn!("Failed to read unread count for badge: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let message = PushMessage {
            title: notification.title.clone(),
            body: notification.body.clone(),
            badge,
            link: notification.link.clone(),
        };

        for channel in &self.channels {
            let granted = match self
                .permissions
                .has_any_for_channel(&notification.recipient, channel.channel())
                .await
            {
                Ok(granted) => granted,
                Err(e) => {
                    tracing::warn!("Permission lookup failed, skipping push: {}", e);
                    continue;
                }
            };
            if !granted {
                continue;
            }

            if let Err(e) = channel.send(&notification.recipient, &message).await {
                tracing::error!(
                    "Push delivery on {} failed for {}: {}",
                    channel.channel().as_str(),
                    notification.recipient,
                    e
                );
            }
        }
    }

    /// After any read-state change: one counter frame to live clients, badge
    /// sync to channels that support it.
    async fn refresh_counters(&self, recipient: &str) {
        self.publish_event(&topic_for(recipient), BusEvent::new(COUNTER_EVENT, ""))
            .await;

        let unread = match self.store.unread_count(recipient).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("Failed to read unread count for badge sync: {}", e);
                return;
            }
        };
        for channel in &self.channels {
            if let Err(e) = channel.update_badge(recipient, unread).await {
                tracing::warn!(
                    "Badge update on {} failed for {}: {}",
                    channel.channel().as_str(),
                    recipient,
                    e
                );
            }
        }
    }

    async fn publish_event(&self, topic: &str, event: BusEvent) {
        if let Err(e) = self.bus.publish(topic, event).await {
            tracing::error!("Event bus publish on {} failed: {}", topic, e);
        }
    }
}

fn ephemeral(draft: NewNotification) -> Notification {
    Notification {
        id: 0,
        recipient: draft.recipient,
        kind: draft.kind,
        title: draft.title,
        body: draft.body,
        link: draft.link,
        read: false,
        read_at: None,
        causer_id: draft.causer_id,
        resource_id: draft.resource_id,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::support::{FakePushChannel, MemoryStore};
    use beacon_bus::InProcessBus;
    use beacon_core::store::{NotificationStore, PermissionStore};
    use beacon_core::types::{Channel, PermissionKind};
    use beacon_core::StoreError;

    fn draft(recipient: &str, kind: NotificationKind) -> NewNotification {
        NewNotification {
            recipient: recipient.to_string(),
            kind,
            title: "You have a reply".to_string(),
            body: "bob replied to your comment".to_string(),
            link: Some("/threads/42".to_string()),
            causer_id: Some("bob".to_string()),
            resource_id: Some("comment:42".to_string()),
        }
    }

    fn notifier(
        store: &Arc<MemoryStore>,
        bus: Arc<dyn EventBus>,
        channels: Vec<Arc<dyn PushChannel>>,
    ) -> Notifier {
        Notifier::new(store.clone(), store.clone(), bus, channels)
    }

    #[tokio::test]
    async fn subscribers_see_counter_then_payload() {
        let store = MemoryStore::shared();
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new());
        let notifier = notifier(&store, bus.clone(), vec![]);

        let mut sub = notifier
            .subscribe("alice", CancellationToken::new())
            .await
            .unwrap();

        let created = notifier
            .publish(draft("alice", NotificationKind::CommentReply), true, false)
            .await
            .unwrap();

        let first = sub.recv().await.unwrap();
        assert_eq!(first.event_type, COUNTER_EVENT);
        assert!(first.data.is_empty());

        let second = sub.recv().await.unwrap();
        assert_eq!(second.event_type, PAYLOAD_EVENT);
        let payload: serde_json::Value = serde_json::from_str(&second.data).unwrap();
        assert_eq!(payload["id"], created.id);
        assert_eq!(payload["title"], "You have a reply");
        assert_eq!(payload["button_label"], "Reply");
    }

    #[tokio::test]
    async fn an_ephemeral_publish_reaches_subscribers_but_not_the_store() {
        let store = MemoryStore::shared();
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new());
        let notifier = notifier(&store, bus.clone(), vec![]);

        let mut sub = notifier
            .subscribe("alice", CancellationToken::new())
            .await
            .unwrap();

        notifier
            .publish(draft("alice", NotificationKind::Mention), false, false)
            .await
            .unwrap();

        assert_eq!(sub.recv().await.unwrap().event_type, COUNTER_EVENT);
        assert_eq!(sub.recv().await.unwrap().event_type, PAYLOAD_EVENT);
        assert!(store
            .list_for_recipient("alice", false, None, 10)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn marking_a_reminder_read_deletes_it() {
        let store = MemoryStore::shared();
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new());
        let notifier = notifier(&store, bus, vec![]);

        let created = notifier
            .publish(draft("alice", NotificationKind::DailyReminder), true, false)
            .await
            .unwrap();

        notifier.mark_read(created.id, Some("alice")).await.unwrap();

        let err = store.get(created.id, Some("alice")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn mark_all_read_deletes_reminders_instead_of_flipping_them() {
        let store = MemoryStore::shared();
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new());
        let notifier = notifier(&store, bus, vec![]);

        let reminder = notifier
            .publish(draft("alice", NotificationKind::DailyReminder), true, false)
            .await
            .unwrap();
        let reply = notifier
            .publish(draft("alice", NotificationKind::CommentReply), true, false)
            .await
            .unwrap();

        assert_eq!(notifier.mark_all_read("alice").await.unwrap(), 2);

        // The reminder never exists read; it is gone, not flipped.
        let err = store.get(reminder.id, Some("alice")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));

        let stored = store.get(reply.id, Some("alice")).await.unwrap();
        assert!(stored.read);
        assert_eq!(notifier.unread_count("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn marking_a_reply_read_keeps_it() {
        let store = MemoryStore::shared();
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new());
        let notifier = notifier(&store, bus, vec![]);

        let created = notifier
            .publish(draft("alice", NotificationKind::CommentReply), true, false)
            .await
            .unwrap();

        notifier.mark_read(created.id, Some("alice")).await.unwrap();

        let stored = store.get(created.id, Some("alice")).await.unwrap();
        assert!(stored.read);
        assert!(stored.read_at.is_some());
        assert_eq!(notifier.unread_count("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn push_requires_a_permission_on_the_channel() {
        let store = MemoryStore::shared();
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new());
        let fake = Arc::new(FakePushChannel::new(Channel::WebPush));
        fake.add_credential("alice", "endpoint-1");
        let notifier = notifier(&store, bus, vec![fake.clone()]);

        notifier
            .publish(draft("alice", NotificationKind::CommentReply), true, true)
            .await
            .unwrap();
        assert!(fake.sent().is_empty(), "push without any grant");

        store
            .grant("alice", PermissionKind::CommunityActivity, Some(Channel::WebPush))
            .await
            .unwrap();
        notifier
            .publish(draft("alice", NotificationKind::CommentReply), true, true)
            .await
            .unwrap();

        let sent = fake.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "alice");
        assert_eq!(sent[0].1.title, "You have a reply");
        assert_eq!(sent[0].1.badge, Some(2));
    }

    #[tokio::test]
    async fn stale_credentials_are_removed_after_a_send() {
        let store = MemoryStore::shared();
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new());
        let fake = Arc::new(FakePushChannel::new(Channel::WebPush));
        fake.add_credential("alice", "alive");
        fake.add_credential("alice", "dead");
        fake.mark_stale("dead");
        store
            .grant("alice", PermissionKind::CommunityActivity, Some(Channel::WebPush))
            .await
            .unwrap();
        let notifier = notifier(&store, bus, vec![fake.clone()]);

        notifier
            .publish(draft("alice", NotificationKind::CommentReply), true, true)
            .await
            .unwrap();

        assert_eq!(fake.credentials("alice"), vec!["alive".to_string()]);
    }

    #[tokio::test]
    async fn mark_all_read_syncs_badges_to_zero() {
        let store = MemoryStore::shared();
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new());
        let fake = Arc::new(FakePushChannel::new(Channel::MobilePush));
        let notifier = notifier(&store, bus.clone(), vec![fake.clone()]);

        notifier
            .publish(draft("alice", NotificationKind::CommentReply), true, false)
            .await
            .unwrap();
        notifier
            .publish(draft("alice", NotificationKind::Mention), true, false)
            .await
            .unwrap();

        let mut sub = notifier
            .subscribe("alice", CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(notifier.mark_all_read("alice").await.unwrap(), 2);
        assert_eq!(fake.badges(), vec![("alice".to_string(), 0)]);
        assert_eq!(sub.recv().await.unwrap().event_type, COUNTER_EVENT);
    }

    #[tokio::test]
    async fn dedup_query_sees_recent_notifications_only() {
        let store = MemoryStore::shared();
        let bus: Arc<dyn EventBus> = Arc::new(InProcessBus::new());
        let notifier = notifier(&store, bus, vec![]);

        notifier
            .publish(draft("alice", NotificationKind::CommentReply), true, false)
            .await
            .unwrap();

        assert!(notifier
            .has_notification_for_resource_and_person(
                NotificationKind::CommentReply,
                Some("bob"),
                Some("comment:42"),
                Duration::hours(1),
            )
            .await
            .unwrap());
        assert!(!notifier
            .has_notification_for_resource_and_person(
                NotificationKind::CommentReply,
                Some("carol"),
                Some("comment:42"),
                Duration::hours(1),
            )
            .await
            .unwrap());
    }
}
