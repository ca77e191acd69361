//! HTTP handlers for the authorization surface

use crate::{
    auth::CurrentPrincipal,
    client_identity::ClientIdentity,
    csrf::CSRF_HEADER,
    security, AppState,
};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use inkboard_applications::LinkShare;
use inkboard_core::{
    forbidden_error, not_found_error, GrantLevel, InkboardError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

/// Error wrapper mapping the core taxonomy onto HTTP statuses.
///
/// `NotFound` is deliberately used for drawings the caller cannot view, so
/// responses never confirm a drawing's existence.
pub struct ApiError(pub InkboardError);

impl From<InkboardError> for ApiError {
    fn from(err: InkboardError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.0.log();
        let (status, code) = match &self.0 {
            InkboardError::Unauthorized { .. } => (StatusCode::UNAUTHORIZED, "unauthorized"),
            InkboardError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
            InkboardError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            InkboardError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            InkboardError::Validation { .. } => (StatusCode::BAD_REQUEST, "validation"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        let mut body = json!({
            "error": code,
            "message": self.0.to_string(),
        });
        if let InkboardError::Forbidden {
            reason: Some(reason),
            ..
        } = &self.0
        {
            body["reason"] = json!(reason);
        }

        (status, Json(body)).into_response()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// CSRF token response
#[derive(Debug, Serialize)]
pub struct CsrfTokenResponse {
    pub token: String,
    pub header: String,
}

/// Issue a CSRF token bound to the caller's client identity.
///
/// Sets or refreshes the identity cookie and is rate limited per IP.
pub async fn csrf_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ip = security::client_ip(&headers);
    if !state.security.rate_limiter.check_rate_limit(ip) {
        return Ok((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "rate_limited",
                "message": "Too many token requests; retry later",
            })),
        )
            .into_response());
    }

    let identity = ClientIdentity::resolve(&headers);
    let token = state.csrf.issue(identity.effective())?;

    let mut response = Json(CsrfTokenResponse {
        token,
        header: CSRF_HEADER.to_string(),
    })
    .into_response();

    match HeaderValue::from_str(&identity.set_cookie_header()) {
        Ok(cookie) => {
            response.headers_mut().insert(header::SET_COOKIE, cookie);
        }
        Err(_) => warn!("Client identity produced an unencodable cookie value"),
    }

    Ok(response)
}

/// Require at least view access, masking absence and no-access alike as 404.
async fn require_view(
    state: &AppState,
    principal: &inkboard_core::Principal,
    drawing_id: &str,
    now: DateTime<Utc>,
) -> Result<inkboard_core::DrawingAccess, ApiError> {
    let access = state.access.resolve(principal, drawing_id, now).await?;
    if !access.can_view() {
        return Err(not_found_error!(format!("drawing {}", drawing_id), "handlers").into());
    }
    Ok(access)
}

/// Link share creation request
#[derive(Debug, Deserialize)]
pub struct CreateLinkShareRequest {
    pub permission: GrantLevel,
    /// Explicit lifetime in seconds; clamped into the configured bounds
    pub expires_in_seconds: Option<i64>,
}

/// Create or replace the active link share for a drawing. Owner only.
pub async fn create_link_share(
    State(state): State<AppState>,
    CurrentPrincipal { principal, .. }: CurrentPrincipal,
    Path(drawing_id): Path<String>,
    Json(request): Json<CreateLinkShareRequest>,
) -> Result<Json<LinkShare>, ApiError> {
    let now = Utc::now();
    let access = require_view(&state, &principal, &drawing_id, now).await?;
    if !access.is_owner() {
        return Err(
            forbidden_error!("Only the drawing owner can manage link shares", "handlers").into(),
        );
    }

    let share = state
        .link_shares
        .create_or_replace(
            &drawing_id,
            request.permission,
            request.expires_in_seconds,
            now,
        )
        .await?;
    Ok(Json(share))
}

/// Revoke a link share. Owner only; revoking twice is a no-op success.
pub async fn revoke_link_share(
    State(state): State<AppState>,
    CurrentPrincipal { principal, .. }: CurrentPrincipal,
    Path((drawing_id, share_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let now = Utc::now();
    let access = require_view(&state, &principal, &drawing_id, now).await?;
    if !access.is_owner() {
        return Err(
            forbidden_error!("Only the drawing owner can manage link shares", "handlers").into(),
        );
    }

    state.link_shares.revoke(&drawing_id, &share_id, now).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Effective access response
#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub drawing_id: String,
    pub access: inkboard_core::DrawingAccess,
}

/// Report the caller's effective access to a drawing.
pub async fn drawing_access(
    State(state): State<AppState>,
    CurrentPrincipal { principal, .. }: CurrentPrincipal,
    Path(drawing_id): Path<String>,
) -> Result<Json<AccessResponse>, ApiError> {
    let access = require_view(&state, &principal, &drawing_id, Utc::now()).await?;
    Ok(Json(AccessResponse { drawing_id, access }))
}

/// List drawings shared with the authenticated caller.
pub async fn shared_with_me(
    State(state): State<AppState>,
    CurrentPrincipal { principal, .. }: CurrentPrincipal,
) -> Result<Json<Vec<inkboard_applications::DrawingRecord>>, ApiError> {
    let Some(user_id) = principal.user_id() else {
        return Err(InkboardError::Unauthorized {
            message: "Sign in to list shared drawings".to_string(),
            context: inkboard_core::ErrorContext::new("handlers"),
        }
        .into());
    };

    let drawings = state.access.shared_with_me(user_id).await?;
    Ok(Json(drawings))
}
