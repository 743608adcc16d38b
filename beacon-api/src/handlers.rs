use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{Html, Json},
};
use beacon_core::types::{Channel, PermissionKind, WebPushCredential};
use beacon_core::{EngineError, StoreError};
use beacon_store::permission_matrix;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::{self, AuthenticatedUser};
use crate::ApiState;

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::Forbidden => StatusCode::FORBIDDEN,
        StoreError::Invalid { .. } => StatusCode::BAD_REQUEST,
        StoreError::Database(_) | StoreError::Pool(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn engine_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Store(e) => store_status(e),
        EngineError::NoPresenceData | EngineError::Bus(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "beacon-api"
    }))
}

#[derive(Deserialize)]
pub struct MintTokenRequest {
    pub recipient: String,
}

pub async fn mint_token(
    Extension(state): Extension<ApiState>,
    Json(req): Json<MintTokenRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if req.recipient.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let token = auth::generate_token(&req.recipient, &state.config.server.jwt_secret, 30)?;
    Ok(Json(serde_json::json!({ "token": token })))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread_only: bool,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list_notifications(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let limit = params.limit.unwrap_or(50).clamp(1, 100);
    let before: Option<DateTime<Utc>> = match &params.before {
        Some(raw) => Some(
            raw.parse()
                .map_err(|_| StatusCode::BAD_REQUEST)?,
        ),
        None => None,
    };

    let notifications = state
        .notifications
        .list_for_recipient(&user.recipient, params.unread_only, before, limit)
        .await
        .map_err(|e| store_status(&e))?;

    let result: Vec<serde_json::Value> = notifications.iter().map(|n| n.to_payload()).collect();
    Ok(Json(serde_json::json!(result)))
}

pub async fn unread_count(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let count = state
        .notifier
        .unread_count(&user.recipient)
        .await
        .map_err(|e| engine_status(&e))?;
    Ok(Json(serde_json::json!({ "unread": count })))
}

pub async fn mark_read(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .notifier
        .mark_read(id, Some(&user.recipient))
        .await
        .map_err(|e| engine_status(&e))?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn mark_unread(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .notifier
        .mark_unread(id, Some(&user.recipient))
        .await
        .map_err(|e| engine_status(&e))?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn mark_all_read(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let updated = state
        .notifier
        .mark_all_read(&user.recipient)
        .await
        .map_err(|e| engine_status(&e))?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

pub async fn delete_notification(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .notifier
        .delete(id, Some(&user.recipient))
        .await
        .map_err(|e| engine_status(&e))?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn get_permissions(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let grants = state
        .permissions
        .grants_for(&user.recipient)
        .await
        .map_err(|e| store_status(&e))?;
    let matrix = permission_matrix(&grants);
    Ok(Json(serde_json::json!(matrix)))
}

#[derive(Deserialize)]
pub struct PermissionRequest {
    pub kind: String,
    #[serde(default)]
    pub channel: Option<String>,
}

fn parse_permission(req: &PermissionRequest) -> Result<(PermissionKind, Option<Channel>), StatusCode> {
    let kind = PermissionKind::parse(&req.kind).ok_or(StatusCode::BAD_REQUEST)?;
    let channel = match &req.channel {
        Some(raw) => Some(Channel::parse(raw).ok_or(StatusCode::BAD_REQUEST)?),
        None => None,
    };
    Ok((kind, channel))
}

pub async fn grant_permission(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<PermissionRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let (kind, channel) = parse_permission(&req)?;
    state
        .permissions
        .grant(&user.recipient, kind, channel)
        .await
        .map_err(|e| store_status(&e))?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn revoke_permission(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<PermissionRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let (kind, channel) = parse_permission(&req)?;
    let revoked = state
        .permissions
        .revoke(&user.recipient, kind, channel, None)
        .await
        .map_err(|e| store_status(&e))?;
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

/// Optional permission scope carried by credential registration: a single
/// permission kind, or "all".
async fn apply_permission_scope(
    state: &ApiState,
    recipient: &str,
    channel: Channel,
    scope: Option<&str>,
) -> Result<(), StatusCode> {
    let Some(scope) = scope else {
        return Ok(());
    };

    let kinds: Vec<PermissionKind> = if scope == "all" {
        PermissionKind::ALL.to_vec()
    } else {
        vec![PermissionKind::parse(scope).ok_or(StatusCode::BAD_REQUEST)?]
    };
    for kind in kinds {
        state
            .permissions
            .grant(recipient, kind, Some(channel))
            .await
            .map_err(|e| store_status(&e))?;
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct WebPushRequest {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    #[serde(default)]
    pub permission: Option<String>,
}

pub async fn register_web_push(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<WebPushRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if req.endpoint.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    state
        .web_push
        .add(
            &user.recipient,
            WebPushCredential {
                endpoint: req.endpoint,
                p256dh: req.p256dh,
                auth: req.auth,
            },
        )
        .await
        .map_err(|e| store_status(&e))?;
    apply_permission_scope(
        &state,
        &user.recipient,
        Channel::WebPush,
        req.permission.as_deref(),
    )
    .await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[derive(Deserialize)]
pub struct RemoveWebPushRequest {
    pub endpoint: String,
}

pub async fn remove_web_push(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<RemoveWebPushRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .web_push
        .delete(&user.recipient, &req.endpoint)
        .await
        .map_err(|e| store_status(&e))?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[derive(Deserialize)]
pub struct DeviceTokenRequest {
    pub token: String,
    #[serde(default)]
    pub permission: Option<String>,
}

pub async fn register_device_token(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<DeviceTokenRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if req.token.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    state
        .device_tokens
        .add(&user.recipient, &req.token)
        .await
        .map_err(|e| store_status(&e))?;
    apply_permission_scope(
        &state,
        &user.recipient,
        Channel::MobilePush,
        req.permission.as_deref(),
    )
    .await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn remove_device_token(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<DeviceTokenRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .device_tokens
        .delete(&user.recipient, &req.token)
        .await
        .map_err(|e| store_status(&e))?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// Feeds the activity estimator. Clients ping this while the app is open.
pub async fn record_presence(
    Extension(state): Extension<ApiState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .presence
        .record_seen(&user.recipient, Utc::now())
        .await
        .map_err(|e| store_status(&e))?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// One-click unsubscribe from email and push footers. No session required,
/// the opaque token is the proof of ownership.
pub async fn unsubscribe(
    Extension(state): Extension<ApiState>,
    Path(token): Path<String>,
) -> Result<Html<&'static str>, StatusCode> {
    match state.permissions.revoke_by_token(&token).await {
        Ok(()) => Ok(Html(
            "<html><body><p>You have been unsubscribed.</p></body></html>",
        )),
        Err(StoreError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(e) => Err(store_status(&e)),
    }
}
