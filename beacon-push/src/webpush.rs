use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use beacon_core::config::PushConfig;
use beacon_core::store::WebPushStore;
use beacon_core::types::{Channel, WebPushCredential};
use tracing;
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushClient, WebPushError,
    WebPushMessageBuilder,
};

use crate::{deliver_all, CredentialTransport, DeliveryOutcome, PushChannel, PushMessage};

/// Browser push over the Web Push protocol with VAPID authentication.
pub struct WebPushChannel {
    client: Option<WebPushClient>,
    vapid_private_key: String,
    vapid_subject: String,
    store: Arc<dyn WebPushStore>,
}

impl WebPushChannel {
    pub fn new(config: &PushConfig, store: Arc<dyn WebPushStore>) -> Self {
        let client = match (&config.vapid_private_key, &config.vapid_subject) {
            (Some(_), Some(_)) => match WebPushClient::new() {
                Ok(client) => {
                    tracing::info!("Initializing Web Push client");
                    Some(client)
                }
                Err(e) => {
                    tracing::warn!("Web push delivery disabled (client init failed: {})", e);
                    None
                }
            },
            _ => {
                tracing::warn!("Web push delivery disabled (missing VAPID configuration)");
                None
            }
        };

        WebPushChannel {
            client,
            vapid_private_key: config.vapid_private_key.clone().unwrap_or_default(),
            vapid_subject: config.vapid_subject.clone().unwrap_or_default(),
            store,
        }
    }

    async fn deliver(
        &self,
        client: &WebPushClient,
        credential: &WebPushCredential,
        message: &PushMessage,
    ) -> DeliveryOutcome {
        let subscription = SubscriptionInfo::new(
            credential.endpoint.clone(),
            credential.p256dh.clone(),
            credential.auth.clone(),
        );

        let mut signature =
            match VapidSignatureBuilder::from_pem(self.vapid_private_key.as_bytes(), &subscription)
            {
                Ok(builder) => builder,
                Err(e) => return DeliveryOutcome::Transient(anyhow!("VAPID key error: {}", e)),
            };
        signature.add_claim("sub", self.vapid_subject.as_str());
        let signature = match signature.build() {
            Ok(s) => s,
            Err(e) => return DeliveryOutcome::Transient(anyhow!("VAPID signature error: {}", e)),
        };

        let payload = serde_json::json!({
            "title": message.title,
            "body": message.body,
            "link": message.link,
        })
        .to_string();

        let mut builder = match WebPushMessageBuilder::new(&subscription) {
            Ok(b) => b,
            Err(e) => return classify_web_push_error(e),
        };
        builder.set_vapid_signature(signature);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload.as_bytes());

        let push_message = match builder.build() {
            Ok(m) => m,
            Err(e) => return classify_web_push_error(e),
        };

        match client.send(push_message).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(e) => classify_web_push_error(e),
        }
    }
}

struct WebPushTransport<'a> {
    channel: &'a WebPushChannel,
    client: &'a WebPushClient,
    message: &'a PushMessage,
}

#[async_trait]
impl CredentialTransport for WebPushTransport<'_> {
    type Credential = WebPushCredential;

    async fn attempt(&self, credential: &WebPushCredential) -> DeliveryOutcome {
        self.channel
            .deliver(self.client, credential, self.message)
            .await
    }

    async fn discard(&self, recipient: &str, credential: &WebPushCredential) -> Result<()> {
        tracing::info!(
            "Removing stale web push subscription for {} ({})",
            recipient,
            credential.endpoint
        );
        Ok(self
            .channel
            .store
            .delete(recipient, &credential.endpoint)
            .await?)
    }
}

fn classify_web_push_error(err: WebPushError) -> DeliveryOutcome {
    match err {
        // The push service reports the subscription is gone for good.
        WebPushError::EndpointNotValid | WebPushError::EndpointNotFound => DeliveryOutcome::Stale,
        other => DeliveryOutcome::Transient(anyhow!(other)),
    }
}

#[async_trait]
impl PushChannel for WebPushChannel {
    fn channel(&self) -> Channel {
        Channel::WebPush
    }

    async fn send(&self, recipient: &str, message: &PushMessage) -> Result<()> {
        let Some(client) = &self.client else {
            tracing::debug!("Web push not configured, skipping");
            return Ok(());
        };

        let credentials = self.store.list(recipient).await?;
        if credentials.is_empty() {
            return Ok(());
        }

        let transport = WebPushTransport {
            channel: self,
            client,
            message,
        };
        deliver_all(&transport, recipient, credentials).await
    }
}
