use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, StatusCode},
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing;

use crate::ApiState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub recipient: String,
    pub exp: usize,
}

/// The identity the auth middleware attaches to each request.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub recipient: String,
}

fn extract_token(auth_header: Option<&str>) -> Option<String> {
    auth_header?
        .strip_prefix("Bearer ")
        .map(|s| s.trim().to_string())
}

pub fn generate_token(
    recipient: &str,
    secret: &str,
    expires_in_days: u64,
) -> Result<String, StatusCode> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .as_secs() as usize;

    let claims = Claims {
        recipient: recipient.to_string(),
        exp: now + (expires_in_days * 24 * 60 * 60) as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|e| {
        tracing::error!("Failed to generate JWT token: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub fn verify_token(token: &str, secret: &str) -> Result<String, StatusCode> {
    let decoding_key = DecodingKey::from_secret(secret.as_ref());
    let validation = Validation::default();

    match decode::<Claims>(token, &decoding_key, &validation) {
        Ok(token_data) => Ok(token_data.claims.recipient),
        Err(e) => {
            tracing::debug!("JWT verification failed: {}", e);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Bearer-token middleware. The stream handshake and unsubscribe links carry
/// their token in the URL instead, so those paths pass through and verify in
/// their handlers.
pub async fn auth_middleware(
    mut req: Request,
    next: axum::middleware::Next,
) -> Result<Response, StatusCode> {
    let path = req.uri().path();
    if path == "/health"
        || path == "/api/v1/auth/token"
        || path == "/api/v1/stream"
        || path.starts_with("/unsubscribe/")
    {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match extract_token(auth_header) {
        Some(t) => t,
        None => {
            tracing::debug!("Missing Authorization header");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    let state = req
        .extensions()
        .get::<ApiState>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let recipient = verify_token(&token, &state.config.server.jwt_secret)?;

    req.extensions_mut().insert(AuthenticatedUser {
        recipient: recipient.clone(),
    });

    tracing::debug!("Authenticated recipient: {}", recipient);

    Ok(next.run(req).await)
}
