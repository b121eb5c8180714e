//! Caller identity for `/api` routes.
//!
//! With a JWT secret configured, requests carry `Authorization: Bearer <HS256
//! token>` and the `sub` claim names the owner. Without one, the `x-owner-id`
//! header is trusted as-is, which is only suitable for local development.

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::ApiResponse;

pub const OWNER_HEADER: &str = "x-owner-id";

/// Authenticated owner of the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerId(pub String);

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Option<String>,
    pub exp: Option<usize>,
}

#[derive(Clone, Default)]
pub struct AuthConfig {
    key: Option<Arc<DecodingKey>>,
}

impl AuthConfig {
    pub fn new(jwt_secret: Option<&str>) -> Self {
        Self {
            key: jwt_secret.map(|secret| Arc::new(DecodingKey::from_secret(secret.as_bytes()))),
        }
    }

    pub fn is_development(&self) -> bool {
        self.key.is_none()
    }

    fn owner(&self, headers: &HeaderMap) -> Option<OwnerId> {
        match &self.key {
            Some(key) => {
                let token = extract_bearer(headers.get(header::AUTHORIZATION))?;
                let data = decode::<Claims>(&token, key, &Validation::new(Algorithm::HS256)).ok()?;
                data.claims
                    .sub
                    .filter(|sub| !sub.trim().is_empty())
                    .map(OwnerId)
            }
            None => headers
                .get(OWNER_HEADER)?
                .to_str()
                .ok()
                .map(str::trim)
                .filter(|owner| !owner.is_empty())
                .map(|owner| OwnerId(owner.to_string())),
        }
    }
}

pub async fn auth_middleware(
    State(auth): State<AuthConfig>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(owner) = auth.owner(req.headers()) else {
        return unauthorized();
    };
    req.extensions_mut().insert(owner);
    next.run(req).await
}

fn extract_bearer(header: Option<&HeaderValue>) -> Option<String> {
    let value = header?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::error("Unauthorized")),
    )
        .into_response()
}
