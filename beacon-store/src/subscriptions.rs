use async_trait::async_trait;
use beacon_core::schema::{device_tokens, web_push_subscriptions};
use beacon_core::store::{DeviceTokenStore, WebPushStore};
use beacon_core::types::WebPushCredential;
use beacon_core::StoreError;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::PgStore;

#[async_trait]
impl WebPushStore for PgStore {
    async fn add(&self, recipient: &str, credential: WebPushCredential) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        // Re-registering an endpoint replaces its keys.
        let existing: Option<i64> = web_push_subscriptions::table
            .select(web_push_subscriptions::id)
            .filter(web_push_subscriptions::recipient.eq(recipient))
            .filter(web_push_subscriptions::endpoint.eq(&credential.endpoint))
            .first(&mut conn)
            .await
            .optional()?;

        match existing {
            Some(id) => {
                diesel::update(web_push_subscriptions::table.filter(web_push_subscriptions::id.eq(id)))
                    .set((
                        web_push_subscriptions::p256dh.eq(&credential.p256dh),
                        web_push_subscriptions::auth.eq(&credential.auth),
                    ))
                    .execute(&mut conn)
                    .await?;
            }
            None => {
                diesel::insert_into(web_push_subscriptions::table)
                    .values((
                        web_push_subscriptions::recipient.eq(recipient),
                        web_push_subscriptions::endpoint.eq(&credential.endpoint),
                        web_push_subscriptions::p256dh.eq(&credential.p256dh),
                        web_push_subscriptions::auth.eq(&credential.auth),
                    ))
                    .execute(&mut conn)
                    .await?;
            }
        }

        Ok(())
    }

    async fn list(&self, recipient: &str) -> Result<Vec<WebPushCredential>, StoreError> {
        let mut conn = self.conn().await?;

        let rows: Vec<(String, String, String)> = web_push_subscriptions::table
            .select((
                web_push_subscriptions::endpoint,
                web_push_subscriptions::p256dh,
                web_push_subscriptions::auth,
            ))
            .filter(web_push_subscriptions::recipient.eq(recipient))
            .load(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(endpoint, p256dh, auth)| WebPushCredential {
                endpoint,
                p256dh,
                auth,
            })
            .collect())
    }

    async fn delete(&self, recipient: &str, endpoint: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        diesel::delete(
            web_push_subscriptions::table
                .filter(web_push_subscriptions::recipient.eq(recipient))
                .filter(web_push_subscriptions::endpoint.eq(endpoint)),
        )
        .execute(&mut conn)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DeviceTokenStore for PgStore {
    async fn add(&self, recipient: &str, token: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        let existing: Option<i64> = device_tokens::table
            .select(device_tokens::id)
            .filter(device_tokens::recipient.eq(recipient))
            .filter(device_tokens::token.eq(token))
            .first(&mut conn)
            .await
            .optional()?;
        if existing.is_some() {
            return Ok(());
        }

        diesel::insert_into(device_tokens::table)
            .values((
                device_tokens::recipient.eq(recipient),
                device_tokens::token.eq(token),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    async fn list(&self, recipient: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;

        let tokens: Vec<String> = device_tokens::table
            .select(device_tokens::token)
            .filter(device_tokens::recipient.eq(recipient))
            .load(&mut conn)
            .await?;

        Ok(tokens)
    }

    async fn delete(&self, recipient: &str, token: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;

        diesel::delete(
            device_tokens::table
                .filter(device_tokens::recipient.eq(recipient))
                .filter(device_tokens::token.eq(token)),
        )
        .execute(&mut conn)
        .await?;

        Ok(())
    }
}
