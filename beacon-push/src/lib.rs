//! Push channel adapters. Each adapter owns its credential store, attempts
//! delivery to every registered credential independently, and deletes
//! credentials the provider has confirmed dead. Delivery is best-effort:
//! missing provider configuration degrades to a logged no-op.

pub mod apns;
pub mod webpush;

use async_trait::async_trait;
use beacon_core::types::Channel;

pub use apns::ApnsChannel;
pub use webpush::WebPushChannel;

#[derive(Debug, Clone)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub badge: Option<u32>,
    pub link: Option<String>,
}

#[async_trait]
pub trait PushChannel: Send + Sync {
    fn channel(&self) -> Channel;

    /// Delivers to every stored credential for `recipient`. A recipient with
    /// zero credentials is an Ok no-op; per-credential provider failures are
    /// classified and never abort the loop.
    async fn send(&self, recipient: &str, message: &PushMessage) -> anyhow::Result<()>;

    /// Badge-only update after a read-state change. Channels without badge
    /// support keep the default no-op.
    async fn update_badge(&self, _recipient: &str, _unread: i64) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Outcome of one credential's delivery attempt.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered,
    /// The provider confirmed the credential is dead; delete it.
    Stale,
    /// Network or provider trouble; logged and skipped.
    Transient(anyhow::Error),
}

/// Credentials whose attempt came back stale. Cleanup runs after the send
/// loop so one dead credential cannot starve the rest.
pub fn collect_stale<C>(outcomes: &[(C, DeliveryOutcome)]) -> Vec<&C> {
    outcomes
        .iter()
        .filter(|(_, outcome)| matches!(outcome, DeliveryOutcome::Stale))
        .map(|(credential, _)| credential)
        .collect()
}

/// One adapter's per-credential transport: a single delivery attempt, and the
/// removal of a credential the provider reported dead. `deliver_all` drives
/// the loop every adapter shares.
#[async_trait]
pub trait CredentialTransport: Send + Sync {
    type Credential: Send + Sync;

    async fn attempt(&self, credential: &Self::Credential) -> DeliveryOutcome;

    async fn discard(
        &self,
        recipient: &str,
        credential: &Self::Credential,
    ) -> anyhow::Result<()>;
}

/// Attempts every credential, classifies each outcome, then discards the
/// stale ones. Transient failures are logged and never abort the loop.
pub async fn deliver_all<T: CredentialTransport>(
    transport: &T,
    recipient: &str,
    credentials: Vec<T::Credential>,
) -> anyhow::Result<()> {
    let mut outcomes = Vec::with_capacity(credentials.len());
    for credential in credentials {
        let outcome = transport.attempt(&credential).await;
        if let DeliveryOutcome::Transient(e) = &outcome {
            tracing::warn!("Transient push failure for {}: {}", recipient, e);
        }
        outcomes.push((credential, outcome));
    }

    for credential in collect_stale(&outcomes) {
        transport.discard(recipient, credential).await?;
    }

    Ok(())
}
