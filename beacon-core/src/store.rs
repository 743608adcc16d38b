//! Narrow async boundaries the engine consumes from the persistence layer.
//! Postgres implementations live in `beacon-store`; tests use in-memory
//! doubles.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::StoreError;
use crate::types::{
    ActivityTimeEstimate, Channel, NewNotification, Notification, NotificationKind,
    PermissionGrant, PermissionKind, WebPushCredential,
};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, draft: NewNotification) -> Result<Notification, StoreError>;

    /// When `owner` is supplied the lookup additionally verifies the
    /// notification belongs to that recipient and reports `NotFound`
    /// otherwise.
    async fn get(&self, id: i64, owner: Option<&str>) -> Result<Notification, StoreError>;

    /// Ordered by creation time, newest first.
    async fn list_for_recipient(
        &self,
        recipient: &str,
        only_unread: bool,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError>;

    async fn mark_read(&self, id: i64, owner: Option<&str>) -> Result<(), StoreError>;

    async fn mark_unread(&self, id: i64, owner: Option<&str>) -> Result<(), StoreError>;

    async fn mark_all_read(&self, recipient: &str) -> Result<u64, StoreError>;

    /// Deletes this recipient's unread notifications of the given kinds.
    /// Kinds that never exist read are purged with this before a bulk
    /// mark-read touches the rest.
    async fn delete_unread_of_kinds(
        &self,
        recipient: &str,
        kinds: &[NotificationKind],
    ) -> Result<u64, StoreError>;

    async fn delete(&self, id: i64, owner: Option<&str>) -> Result<(), StoreError>;

    /// Dedup query: does a notification of `kind` about `resource` caused by
    /// `causer` already exist within `max_age`?
    async fn exists_for_resource_and_causer(
        &self,
        kind: NotificationKind,
        causer: Option<&str>,
        resource: Option<&str>,
        max_age: Duration,
    ) -> Result<bool, StoreError>;

    async fn unread_count(&self, recipient: &str) -> Result<i64, StoreError>;

    /// Every recipient with a notification of `kind` created at or after
    /// `since`. The scheduler's anti-duplication guard.
    async fn recipients_notified_since(
        &self,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<HashSet<String>, StoreError>;

    /// Logs a delivery of a recurring `kind`, one row per (recipient, kind)
    /// replaced in place. Unlike the notification itself, the log entry
    /// survives the recipient reading (and thereby deleting) it.
    async fn record_delivery(
        &self,
        recipient: &str,
        kind: NotificationKind,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Every recipient whose delivery log shows `kind` at or after `since`.
    async fn recipients_delivered_since(
        &self,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<HashSet<String>, StoreError>;

    async fn purge_read_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn record_seen(&self, recipient: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn samples_for(
        &self,
        recipient: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError>;

    async fn active_recipients_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError>;

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait EstimateStore: Send + Sync {
    async fn get(
        &self,
        recipient: &str,
        kind: NotificationKind,
    ) -> Result<Option<ActivityTimeEstimate>, StoreError>;

    /// One row per (recipient, kind), replaced on conflict.
    async fn upsert(
        &self,
        recipient: &str,
        kind: NotificationKind,
        send_minute: u16,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Every recipient whose estimate for `kind` has `send_minute <= minute`.
    async fn recipients_due_by(
        &self,
        kind: NotificationKind,
        minute: u16,
    ) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn grants_for(&self, recipient: &str) -> Result<Vec<PermissionGrant>, StoreError>;

    /// `channel: None` grants every channel, one row each.
    async fn grant(
        &self,
        recipient: &str,
        kind: PermissionKind,
        channel: Option<Channel>,
    ) -> Result<(), StoreError>;

    /// `channel: None` revokes every channel; `token` additionally constrains
    /// the deletion to grants carrying that revocation token.
    async fn revoke(
        &self,
        recipient: &str,
        kind: PermissionKind,
        channel: Option<Channel>,
        token: Option<&str>,
    ) -> Result<u64, StoreError>;

    /// The unsubscribe-by-token surface: revokes the single grant carrying
    /// this opaque token, no session auth involved.
    async fn revoke_by_token(&self, token: &str) -> Result<(), StoreError>;

    async fn has_any_for_channel(
        &self,
        recipient: &str,
        channel: Channel,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait WebPushStore: Send + Sync {
    async fn add(&self, recipient: &str, credential: WebPushCredential) -> Result<(), StoreError>;

    async fn list(&self, recipient: &str) -> Result<Vec<WebPushCredential>, StoreError>;

    async fn delete(&self, recipient: &str, endpoint: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DeviceTokenStore: Send + Sync {
    async fn add(&self, recipient: &str, token: &str) -> Result<(), StoreError>;

    async fn list(&self, recipient: &str) -> Result<Vec<String>, StoreError>;

    async fn delete(&self, recipient: &str, token: &str) -> Result<(), StoreError>;
}
