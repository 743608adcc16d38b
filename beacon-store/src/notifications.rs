use std::collections::HashSet;

use async_trait::async_trait;
use beacon_core::schema::{delivery_log, notifications};
use beacon_core::store::NotificationStore;
use beacon_core::types::{NewNotification, Notification, NotificationKind};
use beacon_core::StoreError;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::PgStore;

#[derive(Queryable, Selectable)]
#[diesel(table_name = beacon_core::schema::notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct NotificationRow {
    id: i64,
    recipient: String,
    kind: String,
    title: String,
    body: String,
    link: Option<String>,
    read: bool,
    read_at: Option<DateTime<Utc>>,
    causer_id: Option<String>,
    resource_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl NotificationRow {
    fn into_domain(self) -> Result<Notification, StoreError> {
        let kind = NotificationKind::parse(&self.kind).ok_or_else(|| StoreError::Invalid {
            field: "kind",
            value: self.kind.clone(),
        })?;

        Ok(Notification {
            id: self.id,
            recipient: self.recipient,
            kind,
            title: self.title,
            body: self.body,
            link: self.link,
            read: self.read,
            read_at: self.read_at,
            causer_id: self.causer_id,
            resource_id: self.resource_id,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn create(&self, draft: NewNotification) -> Result<Notification, StoreError> {
        let mut conn = self.conn().await?;

        let row: NotificationRow = diesel::insert_into(notifications::table)
            .values((
                notifications::recipient.eq(&draft.recipient),
                notifications::kind.eq(draft.kind.as_str()),
                notifications::title.eq(&draft.title),
                notifications::body.eq(&draft.body),
                notifications::link.eq(draft.link.as_deref()),
                notifications::causer_id.eq(draft.causer_id.as_deref()),
                notifications::resource_id.eq(draft.resource_id.as_deref()),
            ))
            .returning(NotificationRow::as_returning())
            .get_result(&mut conn)
            .await?;

        row.into_domain()
    }

    async fn get(&self, id: i64, owner: Option<&str>) -> Result<Notification, StoreError> {
        let mut conn = self.conn().await?;

        let mut query = notifications::table
            .select(NotificationRow::as_select())
            .filter(notifications::id.eq(id))
            .into_boxed();
        if let Some(owner) = owner {
            query = query.filter(notifications::recipient.eq(owner));
        }

        let row: Option<NotificationRow> = query.first(&mut conn).await.optional()?;
        row.ok_or(StoreError::NotFound)?.into_domain()
    }

    async fn list_for_recipient(
        &self,
        recipient: &str,
        only_unread: bool,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut conn = self.conn().await?;

        let mut query = notifications::table
            .select(NotificationRow::as_select())
            .filter(notifications::recipient.eq(recipient))
            .order(notifications::created_at.desc())
            .limit(limit)
            .into_boxed();
        if only_unread {
            query = query.filter(notifications::read.eq(false));
        }
        if let Some(before) = before {
            query = query.filter(notifications::created_at.lt(before));
        }

        let rows: Vec<NotificationRow> = query.load(&mut conn).await?;
        rows.into_iter().map(NotificationRow::into_domain).collect()
    }

    async fn mark_read(&self, id: i64, owner: Option<&str>) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let now = Utc::now();

        let updated = match owner {
            Some(owner) => {
                diesel::update(
                    notifications::table
                        .filter(notifications::id.eq(id))
                        .filter(notifications::recipient.eq(owner)),
                )
                .set((
                    notifications::read.eq(true),
                    notifications::read_at.eq(Some(now)),
                ))
                .execute(&mut conn)
                .await?
            }
            None => {
                diesel::update(notifications::table.filter(notifications::id.eq(id)))
                    .set((
                        notifications::read.eq(true),
                        notifications::read_at.eq(Some(now)),
                    ))
                    .execute(&mut conn)
                    .await?
            }
        };

        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn mark_unread(&self, id: i64, owner: Option<&str>) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        let updated = match owner {
            Some(owner) => {
                diesel::update(
                    notifications::table
                        .filter(notifications::id.eq(id))
                        .filter(notifications::recipient.eq(owner)),
                )
                .set((
                    notifications::read.eq(false),
                    notifications::read_at.eq(None::<DateTime<Utc>>),
                ))
                .execute(&mut conn)
                .await?
            }
            None => {
                diesel::update(notifications::table.filter(notifications::id.eq(id)))
                    .set((
                        notifications::read.eq(false),
                        notifications::read_at.eq(None::<DateTime<Utc>>),
                    ))
                    .execute(&mut conn)
                    .await?
            }
        };

        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn mark_all_read(&self, recipient: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;

        let updated = diesel::update(
            notifications::table
                .filter(notifications::recipient.eq(recipient))
                .filter(notifications::read.eq(false)),
        )
        .set((
            notifications::read.eq(true),
            notifications::read_at.eq(Some(Utc::now())),
        ))
        .execute(&mut conn)
        .await?;

        Ok(updated as u64)
    }

    async fn delete_unread_of_kinds(
        &self,
        recipient: &str,
        kinds: &[NotificationKind],
    ) -> Result<u64, StoreError> {
        if kinds.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let names: Vec<&str> = kinds.iter().map(NotificationKind::as_str).collect();

        let deleted = diesel::delete(
            notifications::table
                .filter(notifications::recipient.eq(recipient))
                .filter(notifications::read.eq(false))
                .filter(notifications::kind.eq_any(names)),
        )
        .execute(&mut conn)
        .await?;

        Ok(deleted as u64)
    }

    async fn delete(&self, id: i64, owner: Option<&str>) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        let deleted = match owner {
            Some(owner) => {
                diesel::delete(
                    notifications::table
                        .filter(notifications::id.eq(id))
                        .filter(notifications::recipient.eq(owner)),
                )
                .execute(&mut conn)
                .await?
            }
            None => {
                diesel::delete(notifications::table.filter(notifications::id.eq(id)))
                    .execute(&mut conn)
                    .await?
            }
        };

        if deleted == 0 {
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
        let mut conn = self.conn().await?;
        let cutoff = Utc::now() - max_age;

        let mut query = notifications::table
            .select(notifications::id)
            .filter(notifications::kind.eq(kind.as_str()))
            .filter(notifications::created_at.ge(cutoff))
            .into_boxed();
        if let Some(causer) = causer {
            query = query.filter(notifications::causer_id.eq(causer));
        }
        if let Some(resource) = resource {
            query = query.filter(notifications::resource_id.eq(resource));
        }

        let found: Option<i64> = query.limit(1).first(&mut conn).await.optional()?;
        Ok(found.is_some())
    }

    async fn unread_count(&self, recipient: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn().await?;

        let count: i64 = notifications::table
            .filter(notifications::recipient.eq(recipient))
            .filter(notifications::read.eq(false))
            .count()
            .get_result(&mut conn)
            .await?;

        Ok(count)
    }

    async fn recipients_notified_since(
        &self,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<HashSet<String>, StoreError> {
        let mut conn = self.conn().await?;

        let recipients: Vec<String> = notifications::table
            .select(notifications::recipient)
            .distinct()
            .filter(notifications::kind.eq(kind.as_str()))
            .filter(notifications::created_at.ge(since))
            .load(&mut conn)
            .await?;

        Ok(recipients.into_iter().collect())
    }

    async fn record_delivery(
        &self,
        recipient: &str,
        kind: NotificationKind,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        diesel::insert_into(delivery_log::table)
            .values((
                delivery_log::recipient.eq(recipient),
                delivery_log::kind.eq(kind.as_str()),
                delivery_log::delivered_at.eq(at),
            ))
            .on_conflict((delivery_log::recipient, delivery_log::kind))
            .do_update()
            .set(delivery_log::delivered_at.eq(at))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn recipients_delivered_since(
        &self,
        kind: NotificationKind,
        since: DateTime<Utc>,
    ) -> Result<HashSet<String>, StoreError> {
        let mut conn = self.conn().await?;

        let recipients: Vec<String> = delivery_log::table
            .select(delivery_log::recipient)
            .filter(delivery_log::kind.eq(kind.as_str()))
            .filter(delivery_log::delivered_at.ge(since))
            .load(&mut conn)
            .await?;

        Ok(recipients.into_iter().collect())
    }

    async fn purge_read_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;

        let deleted = diesel::delete(
            notifications::table
                .filter(notifications::read.eq(true))
                .filter(notifications::created_at.lt(cutoff)),
        )
        .execute(&mut conn)
        .await?;

        Ok(deleted as u64)
    }
}
