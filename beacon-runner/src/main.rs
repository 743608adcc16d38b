use std::sync::Arc;

use anyhow::Result;
use beacon_api::{run as run_api, ApiState};
use beacon_bus::create_bus;
use beacon_core::{BeaconContext, Config};
use beacon_engine::Notifier;
use beacon_push::{ApnsChannel, PushChannel, WebPushChannel};
use beacon_store::PgStore;
use tokio;
use tracing;
use tracing_subscriber;

mod jobs;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting Beacon notification server");

    let config = Config::from_env();
    let ctx = BeaconContext::new(config).await?;

    let store = Arc::new(PgStore::new(ctx.db_pool.clone()));
    let bus = create_bus(&ctx)?;

    let web_push = WebPushChannel::new(&ctx.config.push, store.clone());
    let apns = ApnsChannel::new(&ctx.config.push, store.clone())?;
    let channels: Vec<Arc<dyn PushChannel>> = vec![Arc::new(web_push), Arc::new(apns)];

    let notifier = Arc::new(Notifier::new(
        store.clone(),
        store.clone(),
        bus.clone(),
        channels,
    ));

    tracing::info!("Beacon context initialized");

    let ctx_clone = ctx.clone();
    let store_clone = store.clone();
    tokio::spawn(async move {
        if let Err(e) = jobs::run_scheduler(ctx_clone, store_clone).await {
            tracing::error!("Scheduler error: {}", e);
        }
    });

    let ctx_clone = ctx.clone();
    let store_clone = store.clone();
    let notifier_clone = notifier.clone();
    tokio::spawn(async move {
        if let Err(e) = jobs::run_batch_consumer(ctx_clone, store_clone, notifier_clone).await {
            tracing::error!("Batch consumer error: {}", e);
        }
    });

    let ctx_clone = ctx.clone();
    let store_clone = store.clone();
    tokio::spawn(async move {
        if let Err(e) = jobs::run_purge(ctx_clone, store_clone).await {
            tracing::error!("Purge job error: {}", e);
        }
    });

    let state = ApiState {
        config: ctx.config.clone(),
        notifier,
        notifications: store.clone(),
        permissions: store.clone(),
        presence: store.clone(),
        web_push: store.clone(),
        device_tokens: store,
    };

    tracing::info!("Starting API server");
    run_api(state).await?;

    Ok(())
}
