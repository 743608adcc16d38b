use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing;

use crate::auth;
use crate::ApiState;

const KEEP_ALIVE_SECS: u64 = 15;

#[derive(Deserialize)]
pub struct StreamQuery {
    pub token: String,
}

/// The live notification stream. EventSource cannot set headers, so the
/// bearer token rides in the query string and is verified here instead of in
/// the middleware. The first frame is a welcome event; afterwards each bus
/// frame is forwarded as-is, with periodic comment lines keeping proxies from
/// closing the connection.
pub async fn stream_handler(
    Extension(state): Extension<ApiState>,
    Query(params): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let recipient = auth::verify_token(&params.token, &state.config.server.jwt_secret)?;

    let subscription = state
        .notifier
        .subscribe(&recipient, CancellationToken::new())
        .await
        .map_err(|e| {
            tracing::error!("Failed to subscribe {} to the bus: {}", recipient, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    tracing::info!("Stream opened for {}", recipient);

    let welcome = serde_json::json!({ "recipient": recipient }).to_string();
    let first = stream::once(async move {
        Ok(Event::default().event("welcome").data(welcome))
    });
    let rest = subscription
        .map(|frame| Ok(Event::default().event(frame.event_type).data(frame.data)));

    Ok(Sse::new(first.chain(rest)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("keep-alive"),
    ))
}
