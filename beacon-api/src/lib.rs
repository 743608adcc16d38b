//! HTTP surface: JSON endpoints for the notification center plus the live
//! SSE stream. Everything except health, the stream handshake, token minting
//! and unsubscribe-by-token sits behind bearer-token auth.

pub mod auth;
pub mod handlers;
pub mod server;
pub mod stream;

use std::sync::Arc;

use beacon_core::store::{
    DeviceTokenStore, NotificationStore, PermissionStore, PresenceStore, WebPushStore,
};
use beacon_core::Config;
use beacon_engine::Notifier;

pub use server::run;

/// Everything the handlers need, cloned into each request via Extension.
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<Config>,
    pub notifier: Arc<Notifier>,
    pub notifications: Arc<dyn NotificationStore>,
    pub permissions: Arc<dyn PermissionStore>,
    pub presence: Arc<dyn PresenceStore>,
    pub web_push: Arc<dyn WebPushStore>,
    pub device_tokens: Arc<dyn DeviceTokenStore>,
}
