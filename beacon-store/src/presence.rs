use async_trait::async_trait;
use beacon_core::schema::{activity_estimates, presence_samples};
use beacon_core::store::{EstimateStore, PresenceStore};
use beacon_core::types::{ActivityTimeEstimate, NotificationKind};
use beacon_core::StoreError;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::PgStore;

#[async_trait]
impl PresenceStore for PgStore {
    async fn record_seen(&self, recipient: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        diesel::insert_into(presence_samples::table)
            .values((
                presence_samples::recipient.eq(recipient),
                presence_samples::seen_at.eq(at),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn samples_for(
        &self,
        recipient: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let mut conn = self.conn().await?;

        let samples: Vec<DateTime<Utc>> = presence_samples::table
            .select(presence_samples::seen_at)
            .filter(presence_samples::recipient.eq(recipient))
            .filter(presence_samples::seen_at.ge(since))
            .load(&mut conn)
            .await?;

        Ok(samples)
    }

    async fn active_recipients_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;

        let recipients: Vec<String> = presence_samples::table
            .select(presence_samples::recipient)
            .distinct()
            .filter(presence_samples::seen_at.ge(since))
            .load(&mut conn)
            .await?;

        Ok(recipients)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;

        let deleted =
            diesel::delete(presence_samples::table.filter(presence_samples::seen_at.lt(cutoff)))
                .execute(&mut conn)
                .await?;

        Ok(deleted as u64)
    }
}

#[async_trait]
impl EstimateStore for PgStore {
    async fn get(
        &self,
        recipient: &str,
        kind: NotificationKind,
    ) -> Result<Option<ActivityTimeEstimate>, StoreError> {
        let mut conn = self.conn().await?;

        let row: Option<(i32, DateTime<Utc>)> = activity_estimates::table
            .select((activity_estimates::send_minute, activity_estimates::updated_at))
            .filter(activity_estimates::recipient.eq(recipient))
            .filter(activity_estimates::kind.eq(kind.as_str()))
            .first(&mut conn)
            .await
            .optional()?;

        Ok(row.map(|(send_minute, updated_at)| ActivityTimeEstimate {
            recipient: recipient.to_string(),
            kind,
            send_minute: send_minute.clamp(0, 1439) as u16,
            updated_at,
        }))
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

        let mut conn = self.conn().await?;

        diesel::insert_into(activity_estimates::table)
            .values((
                activity_estimates::recipient.eq(recipient),
                activity_estimates::kind.eq(kind.as_str()),
                activity_estimates::send_minute.eq(send_minute as i32),
                activity_estimates::updated_at.eq(now),
            ))
            .on_conflict((activity_estimates::recipient, activity_estimates::kind))
            .do_update()
            .set((
                activity_estimates::send_minute.eq(send_minute as i32),
                activity_estimates::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn recipients_due_by(
        &self,
        kind: NotificationKind,
        minute: u16,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;

        let recipients: Vec<String> = activity_estimates::table
            .select(activity_estimates::recipient)
            .filter(activity_estimates::kind.eq(kind.as_str()))
            .filter(activity_estimates::send_minute.le(minute as i32))
            .load(&mut conn)
            .await?;

        Ok(recipients)
    }
}
