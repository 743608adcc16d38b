use async_trait::async_trait;
use beacon_core::schema::permission_grants;
use beacon_core::store::PermissionStore;
use beacon_core::types::{
    Channel, ChannelGrant, PermissionEntry, PermissionGrant, PermissionKind,
};
use beacon_core::StoreError;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::PgStore;

/// Computes the full permission matrix from whatever grants exist: one entry
/// per permission kind, each crossed with every channel. A missing grant is
/// "not granted", never a missing cell.
pub fn permission_matrix(grants: &[PermissionGrant]) -> Vec<PermissionEntry> {
    PermissionKind::ALL
        .iter()
        .map(|kind| PermissionEntry {
            kind: *kind,
            title: kind.title(),
            subtitle: kind.subtitle(),
            channels: Channel::ALL
                .iter()
                .map(|channel| ChannelGrant {
                    channel: *channel,
                    granted: grants
                        .iter()
                        .any(|g| g.kind == *kind && g.channel == *channel),
                })
                .collect(),
        })
        .collect()
}

fn expand_channels(channel: Option<Channel>) -> Vec<Channel> {
    match channel {
        Some(channel) => vec![channel],
        None => Channel::ALL.to_vec(),
    }
}

#[async_trait]
impl PermissionStore for PgStore {
    async fn grants_for(&self, recipient: &str) -> Result<Vec<PermissionGrant>, StoreError> {
        let mut conn = self.conn().await?;

        let rows: Vec<(String, String, String, DateTime<Utc>)> = permission_grants::table
            .select((
                permission_grants::kind,
                permission_grants::channel,
                permission_grants::token,
                permission_grants::created_at,
            ))
            .filter(permission_grants::recipient.eq(recipient))
            .load(&mut conn)
            .await?;

        let mut grants = Vec::with_capacity(rows.len());
        for (kind, channel, token, created_at) in rows {
            let kind = PermissionKind::parse(&kind).ok_or_else(|| StoreError::Invalid {
                field: "kind",
                value: kind.clone(),
            })?;
            let channel = Channel::parse(&channel).ok_or_else(|| StoreError::Invalid {
                field: "channel",
                value: channel.clone(),
            })?;
            grants.push(PermissionGrant {
                recipient: recipient.to_string(),
                kind,
                channel,
                token,
                created_at,
            });
        }

        Ok(grants)
    }

    async fn grant(
        &self,
        recipient: &str,
        kind: PermissionKind,
        channel: Option<Channel>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        for channel in expand_channels(channel) {
            let existing: Option<i64> = permission_grants::table
                .select(permission_grants::id)
                .filter(permission_grants::recipient.eq(recipient))
                .filter(permission_grants::kind.eq(kind.as_str()))
                .filter(permission_grants::channel.eq(channel.as_str()))
                .first(&mut conn)
                .await
                .optional()?;
            if existing.is_some() {
                continue;
            }

            diesel::insert_into(permission_grants::table)
                .values((
                    permission_grants::recipient.eq(recipient),
                    permission_grants::kind.eq(kind.as_str()),
                    permission_grants::channel.eq(channel.as_str()),
                    permission_grants::token.eq(Uuid::new_v4().to_string()),
                ))
                .execute(&mut conn)
                .await?;
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
        let mut conn = self.conn().await?;
        let mut deleted = 0;

        for channel in expand_channels(channel) {
            let base = permission_grants::table
                .filter(permission_grants::recipient.eq(recipient))
                .filter(permission_grants::kind.eq(kind.as_str()))
                .filter(permission_grants::channel.eq(channel.as_str()));

            deleted += match token {
                Some(token) => {
                    diesel::delete(base.filter(permission_grants::token.eq(token)))
                        .execute(&mut conn)
                        .await?
                }
                None => diesel::delete(base).execute(&mut conn).await?,
            };
        }

        Ok(deleted as u64)
    }

    async fn revoke_by_token(&self, token: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        let deleted =
            diesel::delete(permission_grants::table.filter(permission_grants::token.eq(token)))
                .execute(&mut conn)
                .await?;

        if deleted == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn has_any_for_channel(
        &self,
        recipient: &str,
        channel: Channel,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;

        let found: Option<i64> = permission_grants::table
            .select(permission_grants::id)
            .filter(permission_grants::recipient.eq(recipient))
            .filter(permission_grants::channel.eq(channel.as_str()))
            .limit(1)
            .first(&mut conn)
            .await
            .optional()?;

        Ok(found.is_some())
    }
}
