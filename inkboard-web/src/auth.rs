//! Bearer session authentication
//!
//! Resolves a [`Principal`] from the `Authorization` header. Credential
//! management (passwords, federated sign-in) lives outside this service;
//! this module only verifies the signed session tokens those flows hand
//! out.

use crate::AppState;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use inkboard_core::Principal;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::LazyLock;
use tracing::debug;

/// Session signing keys - initialized from environment variable
static KEYS: LazyLock<Keys> = LazyLock::new(|| {
    let secret = std::env::var("INKBOARD_SESSION_SECRET")
        .unwrap_or_else(|_| "inkboard-default-secret-change-in-production".to_string());
    Keys::new(secret.as_bytes())
});

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// Session token claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (account id)
    pub sub: String,
    /// Display name resolved at sign-in
    pub name: Option<String>,
    /// Issued at (timestamp)
    pub iat: i64,
    /// Expiration time (timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: String, name: Option<String>) -> Self {
        let now = Utc::now();
        let exp = now + Duration::hours(8);

        Self {
            sub: user_id,
            name,
            iat: now.timestamp(),
            exp: exp.timestamp(),
        }
    }
}

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingCredentials,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token creation failed")]
    TokenCreation,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            AuthError::MissingCredentials => (
                StatusCode::UNAUTHORIZED,
                "missing_credentials",
                "Authentication is required",
            ),
            AuthError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "invalid_token",
                "Invalid or expired session token",
            ),
            AuthError::TokenCreation => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "token_creation_failed",
                "Failed to create session token",
            ),
        };

        let body = Json(json!({
            "error": error_code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

/// Session token utilities
pub struct SessionTokenService;

impl SessionTokenService {
    /// Issue a session token for an account
    pub fn issue(user_id: &str, name: Option<String>) -> Result<String, AuthError> {
        let claims = Claims::new(user_id.to_string(), name);
        encode(&Header::default(), &claims, &KEYS.encoding).map_err(|e| {
            debug!("Failed to encode session token: {}", e);
            AuthError::TokenCreation
        })
    }

    /// Verify and decode a session token
    pub fn verify(token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &KEYS.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Session token verification failed: {}", e);
                AuthError::InvalidToken
            })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Resolve the principal for a request.
///
/// A present-but-invalid credential is always an error; a missing one is
/// anonymous unless authentication is globally required.
pub fn principal_from_headers(
    headers: &HeaderMap,
    require_auth: bool,
) -> Result<(Principal, Option<Claims>), AuthError> {
    match bearer_token(headers) {
        Some(token) => {
            let claims = SessionTokenService::verify(token)?;
            Ok((Principal::User(claims.sub.clone()), Some(claims)))
        }
        None if require_auth => Err(AuthError::MissingCredentials),
        None => Ok((Principal::Anonymous, None)),
    }
}

/// Extractor yielding the request's principal; anonymous when no
/// credential is supplied.
pub struct CurrentPrincipal {
    pub principal: Principal,
    pub claims: Option<Claims>,
}

impl<S> FromRequestParts<S> for CurrentPrincipal
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let (principal, claims) = principal_from_headers(&parts.headers, false)?;
        Ok(CurrentPrincipal { principal, claims })
    }
}
