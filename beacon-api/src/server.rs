use anyhow::Result;
use axum::{
    extract::Extension,
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::env;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing;

use crate::auth;
use crate::handlers;
use crate::stream;
use crate::ApiState;

pub async fn run(state: ApiState) -> Result<()> {
    let api_port = state.config.server.api_port;

    let cors_layer = if let Ok(origins) = env::var("CORS_ORIGINS") {
        let origin_list: Vec<&str> = origins.split(',').map(|s| s.trim()).collect();
        let mut cors = CorsLayer::new();
        for origin in origin_list {
            if let Ok(parsed) = origin.parse::<axum::http::HeaderValue>() {
                cors = cors.allow_origin(parsed);
            }
        }
        cors.allow_methods(Any)
            .allow_headers(Any)
            .allow_credentials(true)
    } else {
        tracing::warn!(
            "CORS_ORIGINS not set, using permissive CORS. Set CORS_ORIGINS for production!"
        );
        CorsLayer::permissive()
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/auth/token", post(handlers::mint_token))
        .route("/api/v1/stream", get(stream::stream_handler))
        .route("/api/v1/notifications", get(handlers::list_notifications))
        .route(
            "/api/v1/notifications/unread_count",
            get(handlers::unread_count),
        )
        .route(
            "/api/v1/notifications/read-all",
            post(handlers::mark_all_read),
        )
        .route("/api/v1/notifications/:id/read", post(handlers::mark_read))
        .route(
            "/api/v1/notifications/:id/unread",
            post(handlers::mark_unread),
        )
        .route(
            "/api/v1/notifications/:id",
            delete(handlers::delete_notification),
        )
        .route(
            "/api/v1/permissions",
            get(handlers::get_permissions)
                .post(handlers::grant_permission)
                .delete(handlers::revoke_permission),
        )
        .route(
            "/api/v1/push/web",
            post(handlers::register_web_push).delete(handlers::remove_web_push),
        )
        .route(
            "/api/v1/push/device",
            post(handlers::register_device_token).delete(handlers::remove_device_token),
        )
        .route("/api/v1/presence", post(handlers::record_presence))
        .route("/unsubscribe/:token", get(handlers::unsubscribe))
        .layer(
            ServiceBuilder::new()
                .layer(Extension(state))
                .layer(middleware::from_fn(auth::auth_middleware))
                .layer(cors_layer),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], api_port));
    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
