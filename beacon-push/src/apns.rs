use std::fs;
use std::sync::Arc;

use a2::{
    Client, Endpoint, Error as ApnsError, ErrorReason, NotificationBuilder, NotificationOptions,
    PlainNotificationBuilder,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use beacon_core::config::PushConfig;
use beacon_core::store::DeviceTokenStore;
use beacon_core::types::Channel;
use tracing;

use crate::{deliver_all, CredentialTransport, DeliveryOutcome, PushChannel, PushMessage};

/// Mobile push over APNs with token-based authentication.
pub struct ApnsChannel {
    client: Option<Client>,
    bundle_id: String,
    store: Arc<dyn DeviceTokenStore>,
}

impl ApnsChannel {
    pub fn new(config: &PushConfig, store: Arc<dyn DeviceTokenStore>) -> Result<Self> {
        let bundle_id = config.apns_bundle_id.clone().unwrap_or_default();

        let client = if let (Some(key_id), Some(team_id)) =
            (&config.apns_key_id, &config.apns_team_id)
        {
            tracing::info!("Initializing APNs client");

            // Key material comes either inline (base64) or from a file.
            let key_content = if let Some(key_content_base64) = &config.apns_key_content {
                use base64::Engine;
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(key_content_base64)
                    .map_err(|e| anyhow!("Failed to decode base64 APNs key: {}", e))?;
                String::from_utf8(decoded)
                    .map_err(|e| anyhow!("Failed to convert APNs key to UTF-8: {}", e))?
            } else if let Some(key_path) = &config.apns_key_path {
                fs::read_to_string(key_path)
                    .map_err(|e| anyhow!("Failed to read APNs key file {}: {}", key_path, e))?
            } else {
                return Err(anyhow!(
                    "Either apns_key_path or apns_key_content must be provided"
                ));
            };

            let client = Client::token(
                key_content.as_bytes(),
                key_id,
                team_id,
                if bundle_id.contains("sandbox") || bundle_id.contains("dev") {
                    Endpoint::Sandbox
                } else {
                    Endpoint::Production
                },
            )
            .map_err(|e| anyhow!("Failed to create APNs client: {}", e))?;

            Some(client)
        } else {
            tracing::warn!("APNs delivery disabled (missing configuration)");
            None
        };

        Ok(ApnsChannel {
            client,
            bundle_id,
            store,
        })
    }

    async fn dispatch(&self, recipient: &str, body: &str, badge: Option<u32>) -> Result<()> {
        let Some(client) = &self.client else {
            tracing::debug!("APNs not configured, skipping");
            return Ok(());
        };

        let tokens = self.store.list(recipient).await?;
        if tokens.is_empty() {
            return Ok(());
        }

        let transport = ApnsTransport {
            channel: self,
            client,
            body,
            badge,
        };
        deliver_all(&transport, recipient, tokens).await
    }

    async fn deliver(
        &self,
        client: &Client,
        device_token: &str,
        body: &str,
        badge: Option<u32>,
    ) -> DeliveryOutcome {
        let mut builder = PlainNotificationBuilder::new(body);
        if let Some(badge) = badge {
            builder.set_badge(badge);
        }

        let mut options = NotificationOptions::default();
        if !self.bundle_id.is_empty() {
            options.apns_topic = Some(&self.bundle_id);
        }

        let payload = builder.build(device_token, options);

        match client.send(payload).await {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(e) => classify_apns_error(e),
        }
    }
}

struct ApnsTransport<'a> {
    channel: &'a ApnsChannel,
    client: &'a Client,
    body: &'a str,
    badge: Option<u32>,
}

#[async_trait]
impl CredentialTransport for ApnsTransport<'_> {
    type Credential = String;

    async fn attempt(&self, token: &String) -> DeliveryOutcome {
        self.channel
            .deliver(self.client, token, self.body, self.badge)
            .await
    }

    async fn discard(&self, recipient: &str, token: &String) -> Result<()> {
        tracing::info!("Removing stale device token for {}", recipient);
        Ok(self.channel.store.delete(recipient, token).await?)
    }
}

fn classify_apns_error(err: ApnsError) -> DeliveryOutcome {
    if let ApnsError::ResponseError(response) = &err {
        if let Some(error) = &response.error {
            match error.reason {
                // APNs says this token will never work again.
                ErrorReason::Unregistered
                | ErrorReason::BadDeviceToken
                | ErrorReason::DeviceTokenNotForTopic => return DeliveryOutcome::Stale,
                _ => {}
            }
        }
    }
    DeliveryOutcome::Transient(anyhow!(err))
}

#[async_trait]
impl PushChannel for ApnsChannel {
    fn channel(&self) -> Channel {
        Channel::MobilePush
    }

    async fn send(&self, recipient: &str, message: &PushMessage) -> Result<()> {
        self.dispatch(recipient, &message.body, message.badge).await
    }

    async fn update_badge(&self, recipient: &str, unread: i64) -> Result<()> {
        self.dispatch(recipient, "", Some(unread.max(0) as u32))
            .await
    }
}
