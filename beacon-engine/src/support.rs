//! In-memory doubles for the store traits and the push seam. Test-only.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use beacon_core::store::{
    EstimateStore, NotificationStore, PermissionStore, PresenceStore,
};
use beacon_core::types::{
    ActivityTimeEstimate, Channel, NewNotification, Notification, NotificationKind,
    PermissionGrant, PermissionKind,
};
use beacon_core::StoreError;
use beacon_push::{deliver_all, CredentialTransport, DeliveryOutcome, PushChannel, PushMessage};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    notifications: Mutex<Vec<Notification>>,
    deliveries: Mutex<HashMap<(String, NotificationKind), DateTime<Utc>>>,
    presence: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
    estimates: Mutex<HashMap<(String, NotificationKind), ActivityTimeEstimate>>,
    grants: Mutex<Vec<PermissionGrant>>,
}

impl MemoryStore {
    pub fn shared() -> Arc<Self> {
        Arc::new(MemoryStore::default())
    }

    pub fn seed_presence(&self, recipient: &str, samples: &[DateTime<Utc>]) {
        lock(&self.presence)
            .entry(recipient.to_string())
            .or_default()
            .extend_from_slice(samples);
    }

    pub fn seed_estimate(&self, recipient: &str, kind: NotificationKind, send_minute: u16) {
        lock(&self.estimates).insert(
            (recipient.to_string(), kind),
            ActivityTimeEstimate {
                recipient: recipient.to_string(),
                kind,
                send_minute,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn seed_notification_at(&self, draft: NewNotification, created_at: DateTime<Utc>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.notifications).push(Notification {
            id,
            recipient: draft.recipient,
            kind: draft.kind,
            title: draft.title,
            body: draft.body,
            link: draft.link,
            read: false,
            read_at: None,
            causer_id: draft.causer_id,
            resource_id: draft.resource_id,
            created_at,
        });
    }

    fn find(
        &self,
        id: i64,
        owner: Option<&str>,
    ) -> Result<Notification, StoreError> {
        lock(&self.notifications)
            .iter()
            .find(|n| n.id == id && owner.map_or(true, |o| n.recipient == o))
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create(&self, draft: NewNotification) -> Result<Notification, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let notification = Notification {
            id,
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
        };
        lock(&self.notifications).push(notification.clone());
        Ok(notification)
    }

    async fn get(&self, id: i64, owner: Option<&str>) -> Result<Notification, StoreError> {
        self.find(id, owner)
    }

    async fn list_for_recipient(
        &self,
        recipient: &str,
        only_unread: bool,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut rows: Vec<Notification> = lock(&self.notifications)
            .iter()
            .filter(|n| n.recipient == recipient)
            .filter(|n| !only_unread || !n.read)
            .filter(|n| before.map_or(true, |b| n.created_at < b))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn mark_read(&self, id: i64, owner: Option<&str>) -> Result<(), StoreError> {
        let mut rows = lock(&self.notifications);
        let row = rows
            .iter_mut()
            .find(|n| n.id == id && owner.map_or(true, |o| n.recipient == o))
            .ok_or(StoreError::NotFound)?;
        row.read = true;
        row.read_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_unread(&self, id: i64, owner: Option<&str>) -> Result<(), StoreError> {
        let mut rows = lock(&self.notifications);
        let row = rows
            .iter_mut()
            .find(|n| n.id == id && owner.map_or(true, |o| n.recipient == o))
            .ok_or(StoreError::NotFound)?;
        row.read = false;
        row.read_at = None;
        Ok(())
    }

    async fn mark_all_read(&self, recipient: &str) -> Result<u64, StoreError> {
        let mut rows = lock(&self.notifications);
        let mut changed = 0;
        for row in rows.iter_mut().filter(|n| n.recipient == recipient && !n.read) {
            row.read = true;
            row.read_at = Some(Utc::now());
            changed += 1;
        }
        Ok(changed)
    }

    async fn delete_unread_of_kinds(
        &self,
        recipient: &str,
        kinds: &[NotificationKind],
    ) -> Result<u64, StoreError> {
        let mut rows = lock(&self.notifications);
        let before = rows.len();
        rows.retain(|n| !(n.recipient == recipient && !n.read && kinds.contains(&n.kind)));
        Ok((before - rows.len()) as u64)
    }

    async fn delete(&self, id: i64, owner: Option<&str>) -> Result<(), StoreError> {
        let mut rows = lock(&self.notifications);
        let before = rows.len();
        rows.retain(|n| !(n.id == id && owner.map_or(true, |o| n.recipient == o)));
        if rows.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn exists_for_resource_and_causer(
        &self,
        kind: NotificationKind,
        causer: Option<&str>,
        resource: Option<&str>,
        max_age: Duration,
    ) -> Result<bool, StoreError> {
        let cutoff = Utc::now() - max_age;
        Ok(lock(&self.notifications).iter().any(|n| {
            n.kind == kind
                && n.created_at >= cutoff
                && causer.map_or(true, |c| n.causer_id.as_deref() == Some(c))
                && resource.map_or(true, |r| n.resource_id.as_deref() == Some(r))
        }))
    }

    async fn unread_count(&self, recipient: &str) -> Result<i64, StoreError> {
        Ok(lock(&self.notifications)
            .iter()
            .filter(|n| n.recipient == recipient && !n.read)
            .count() as i64)
    }

    async fn recipients_notified_since(
        &self,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<HashSet<String>, StoreError> {
        Ok(lock(&self.notifications)
            .iter()
            .filter(|n| n.kind == kind && n.created_at >= since)
            .map(|n| n.recipient.clone())
            .collect())
    }

    async fn record_delivery(
        &self,
        recipient: &str,
        kind: NotificationKind,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        lock(&self.deliveries).insert((recipient.to_string(), kind), at);
        Ok(())
    }

    async fn recipients_delivered_since(
        &self,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<HashSet<String>, StoreError> {
        Ok(lock(&self.deliveries)
            .iter()
            .filter(|((_, k), at)| *k == kind && **at >= since)
            .map(|((recipient, _), _)| recipient.clone())
            .collect())
    }

    async fn purge_read_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = lock(&self.notifications);
        let before = rows.len();
        rows.retain(|n| !(n.read && n.created_at < cutoff));
        Ok((before - rows.len()) as u64)
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn record_seen(&self, recipient: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        lock(&self.presence)
            .entry(recipient.to_string())
            .or_default()
            .push(at);
        Ok(())
    }

    async fn samples_for(
        &self,
        recipient: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        Ok(lock(&self.presence)
            .get(recipient)
            .map(|samples| samples.iter().copied().filter(|s| *s >= since).collect())
            .unwrap_or_default())
    }

    async fn active_recipients_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let mut recipients: Vec<String> = lock(&self.presence)
            .iter()
            .filter(|(_, samples)| samples.iter().any(|s| *s >= since))
            .map(|(recipient, _)| recipient.clone())
            .collect();
        recipients.sort();
        Ok(recipients)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut purged = 0u64;
        for samples in lock(&self.presence).values_mut() {
            let before = samples.len();
            samples.retain(|s| *s >= cutoff);
            purged += (before - samples.len()) as u64;
        }
        Ok(purged)
    }
}

#[async_trait]
impl EstimateStore for MemoryStore {
    async fn get(
        &self,
        recipient: &str,
        kind: NotificationKind,
    ) -> Result<Option<ActivityTimeEstimate>, StoreError> {
        Ok(lock(&self.estimates)
            .get(&(recipient.to_string(), kind))
            .cloned())
    }

    async fn upsert(
        &self,
        recipient: &str,
        kind: NotificationKind,
        send_minute: u16,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if send_minute > 1439 {
            return Err(StoreError::Invalid {
                field: "send_minute",
                value: send_minute.to_string(),
            });
        }
        lock(&self.estimates).insert(
            (recipient.to_string(), kind),
            ActivityTimeEstimate {
                recipient: recipient.to_string(),
                kind,
                send_minute,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn recipients_due_by(
        &self,
        kind: NotificationKind,
        minute: u16,
    ) -> Result<Vec<String>, StoreError> {
        let mut due: Vec<String> = lock(&self.estimates)
            .values()
            .filter(|e| e.kind == kind && e.send_minute <= minute)
            .map(|e| e.recipient.clone())
            .collect();
        due.sort();
        Ok(due)
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn grants_for(&self, recipient: &str) -> Result<Vec<PermissionGrant>, StoreError> {
        Ok(lock(&self.grants)
            .iter()
            .filter(|g| g.recipient == recipient)
            .cloned()
            .collect())
    }

    async fn grant(
        &self,
        recipient: &str,
        kind: PermissionKind,
        channel: Option<Channel>,
    ) -> Result<(), StoreError> {
        let mut grants = lock(&self.grants);
        for channel in channels(channel) {
            let exists = grants
                .iter()
                .any(|g| g.recipient == recipient && g.kind == kind && g.channel == channel);
            if !exists {
                grants.push(PermissionGrant {
                    recipient: recipient.to_string(),
                    kind,
                    channel,
                    token: Uuid::new_v4().to_string(),
                    created_at: Utc::now(),
                });
            }
        }
        Ok(())
    }

    async fn revoke(
        &self,
        recipient: &str,
        kind: PermissionKind,
        channel: Option<Channel>,
        token: Option<&str>,
    ) -> Result<u64, StoreError> {
        let targets = channels(channel);
        let mut grants = lock(&self.grants);
        let before = grants.len();
        grants.retain(|g| {
            !(g.recipient == recipient
                && g.kind == kind
                && targets.contains(&g.channel)
                && token.map_or(true, |t| g.token == t))
        });
        Ok((before - grants.len()) as u64)
    }

    async fn revoke_by_token(&self, token: &str) -> Result<(), StoreError> {
        let mut grants = lock(&self.grants);
        let before = grants.len();
        grants.retain(|g| g.token != token);
        if grants.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn has_any_for_channel(
        &self,
        recipient: &str,
        channel: Channel,
    ) -> Result<bool, StoreError> {
        Ok(lock(&self.grants)
            .iter()
            .any(|g| g.recipient == recipient && g.channel == channel))
    }
}

fn channels(channel: Option<Channel>) -> Vec<Channel> {
    match channel {
        Some(channel) => vec![channel],
        None => Channel::ALL.to_vec(),
    }
}

/// A push channel that records what it was asked to do. Credentials flagged
/// stale surface as `Stale` outcomes, so sends run the same attempt-then-
/// cleanup loop the real adapters use.
pub struct FakePushChannel {
    channel: Channel,
    credentials: Mutex<HashMap<String, Vec<String>>>,
    stale: Mutex<HashSet<String>>,
    sent: Mutex<Vec<(String, PushMessage)>>,
    badges: Mutex<Vec<(String, i64)>>,
}

impl FakePushChannel {
    pub fn new(channel: Channel) -> Self {
        FakePushChannel {
            channel,
            credentials: Mutex::new(HashMap::new()),
            stale: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            badges: Mutex::new(Vec::new()),
        }
    }

    pub fn add_credential(&self, recipient: &str, credential: &str) {
        lock(&self.credentials)
            .entry(recipient.to_string())
            .or_default()
            .push(credential.to_string());
    }

    pub fn mark_stale(&self, credential: &str) {
        lock(&self.stale).insert(credential.to_string());
    }

    pub fn credentials(&self, recipient: &str) -> Vec<String> {
        lock(&self.credentials)
            .get(recipient)
            .cloned()
            .unwrap_or_default()
    }

    pub fn sent(&self) -> Vec<(String, PushMessage)> {
        lock(&self.sent).clone()
    }

    pub fn badges(&self) -> Vec<(String, i64)> {
        lock(&self.badges).clone()
    }
}

#[async_trait]
impl CredentialTransport for FakePushChannel {
    type Credential = String;

    async fn attempt(&self, credential: &String) -> DeliveryOutcome {
        if lock(&self.stale).contains(credential) {
            DeliveryOutcome::Stale
        } else {
            DeliveryOutcome::Delivered
        }
    }

    async fn discard(&self, recipient: &str, credential: &String) -> anyhow::Result<()> {
        if let Some(list) = lock(&self.credentials).get_mut(recipient) {
            list.retain(|c| c != credential);
        }
        Ok(())
    }
}

#[async_trait]
impl PushChannel for FakePushChannel {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, recipient: &str, message: &PushMessage) -> anyhow::Result<()> {
        let targets = self.credentials(recipient);
        if targets.is_empty() {
            return Ok(());
        }

        deliver_all(self, recipient, targets).await?;
        lock(&self.sent).push((recipient.to_string(), message.clone()));
        Ok(())
    }

    async fn update_badge(&self, recipient: &str, unread: i64) -> anyhow::Result<()> {
        lock(&self.badges).push((recipient.to_string(), unread));
        Ok(())
    }
}
