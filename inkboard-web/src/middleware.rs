//! CSRF protection middleware
//!
//! Applied to every mutating request under `/api`. The check runs in two
//! stages: browser origin verification against the configured allow-list,
//! then stateless token validation against the caller's candidate client
//! identities. Failures are always 403 with a machine-readable reason code.

use crate::{client_identity::ClientIdentity, csrf::CSRF_HEADER, AppState};
use axum::{
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use inkboard_core::CsrfConfig;
use serde_json::json;
use tracing::debug;
use url::Url;

/// Reason codes surfaced on 403 responses.
pub mod reason {
    pub const ORIGIN_MISMATCH: &str = "origin-mismatch";
    pub const REFERER_MISMATCH: &str = "referer-mismatch";
    pub const TOKEN_MISSING: &str = "token-missing";
    pub const TOKEN_INVALID: &str = "token-invalid";
}

/// CSRF middleware entry point.
pub async fn csrf_protection(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !is_mutating(request.method()) {
        return next.run(request).await;
    }

    let headers = request.headers();
    let config = &state.config.inkboard.csrf;

    // Browser origin verification. A missing Origin falls back to Referer;
    // missing both is tolerated (non-browser clients).
    if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
        if !origin_allowed(origin, config) {
            debug!(origin, "Rejected mutation: origin not in allow-list");
            return csrf_rejection(reason::ORIGIN_MISMATCH);
        }
    } else if let Some(referer) = headers.get(header::REFERER).and_then(|v| v.to_str().ok()) {
        match referer_origin(referer) {
            Some(origin) if origin_allowed(&origin, config) => {}
            _ => {
                debug!(referer, "Rejected mutation: referer origin not in allow-list");
                return csrf_rejection(reason::REFERER_MISMATCH);
            }
        }
    }

    let Some(token) = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok()) else {
        return csrf_rejection(reason::TOKEN_MISSING);
    };

    let identity = ClientIdentity::resolve(headers);
    if !state.csrf.validate_any(&identity.candidates(), token) {
        return csrf_rejection(reason::TOKEN_INVALID);
    }

    next.run(request).await
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn csrf_rejection(reason: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": "csrf",
            "reason": reason,
            "message": "Cross-site request verification failed",
        })),
    )
        .into_response()
}

/// Extract the origin (scheme + host + port) from a Referer value.
///
/// Strict URL parsing only: substring matching would accept host-confusion
/// tricks such as the target origin embedded in a path or userinfo
/// component of a hostile URL.
fn referer_origin(referer: &str) -> Option<String> {
    let url = Url::parse(referer).ok()?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some(origin.ascii_serialization())
}

/// Exact allow-list match on a normalized origin.
fn origin_allowed(origin: &str, config: &CsrfConfig) -> bool {
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    let parsed = url.origin();
    if !parsed.is_tuple() {
        return false;
    }

    // Documented development exception for local front-ends.
    if config.dev_mode {
        if let url::Origin::Tuple(scheme, host, _) = &parsed {
            let host = host.to_string();
            if scheme == "http" && (host == "localhost" || host == "127.0.0.1") {
                return true;
            }
        }
    }

    let serialized = parsed.ascii_serialization();
    config.allowed_origins.iter().any(|allowed| {
        Url::parse(allowed)
            .map(|allowed_url| allowed_url.origin().ascii_serialization() == serialized)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(origins: &[&str], dev_mode: bool) -> CsrfConfig {
        CsrfConfig {
            token_ttl_hours: 24,
            future_skew_secs: 300,
            issue_rate_per_minute: 30,
            allowed_origins: origins.iter().map(|s| s.to_string()).collect(),
            dev_mode,
        }
    }

    #[test]
    fn exact_origin_matches() {
        let config = config(&["https://draw.example.com"], false);
        assert!(origin_allowed("https://draw.example.com", &config));
        assert!(origin_allowed("https://draw.example.com/", &config));
        assert!(!origin_allowed("https://other.example.com", &config));
        assert!(!origin_allowed("http://draw.example.com", &config));
    }

    #[test]
    fn host_confusion_is_rejected() {
        let config = config(&["https://draw.example.com"], false);
        // Allowed origin embedded in path, userinfo or as a subdomain prefix.
        assert!(!origin_allowed("https://evil.com/https://draw.example.com", &config));
        assert!(!origin_allowed("https://draw.example.com@evil.com", &config));
        assert!(!origin_allowed("https://draw.example.com.evil.com", &config));
    }

    #[test]
    fn referer_reduces_to_its_origin() {
        assert_eq!(
            referer_origin("https://draw.example.com/boards/42?tab=share").as_deref(),
            Some("https://draw.example.com")
        );
        assert_eq!(
            referer_origin("https://draw.example.com:8443/x").as_deref(),
            Some("https://draw.example.com:8443")
        );
        assert_eq!(referer_origin("not a url"), None);
        // Referer pointing at a hostile URL with the target in userinfo.
        assert_eq!(
            referer_origin("https://draw.example.com@evil.com/boards").as_deref(),
            Some("https://evil.com")
        );
    }

    #[test]
    fn dev_mode_allows_localhost_only() {
        let dev = config(&["https://draw.example.com"], true);
        assert!(origin_allowed("http://localhost:3000", &dev));
        assert!(origin_allowed("http://127.0.0.1:5173", &dev));
        assert!(!origin_allowed("http://evil.com", &dev));

        let strict = config(&["https://draw.example.com"], false);
        assert!(!origin_allowed("http://localhost:3000", &strict));
    }

    #[test]
    fn garbage_origins_fail_closed() {
        let config = config(&["https://draw.example.com"], false);
        assert!(!origin_allowed("", &config));
        assert!(!origin_allowed("null", &config));
        assert!(!origin_allowed("draw.example.com", &config));
    }
}
