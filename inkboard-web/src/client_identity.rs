//! Client identity resolution for CSRF token binding
//!
//! The preferred identity is a long-lived random value in a first-party
//! cookie: stable across reverse-proxy hops and across IP changes. The
//! legacy fallback derives `"ip:user_agent"`, which is unstable whenever
//! the apparent client IP changes between requests (proxy hops, NAT); that
//! weakness is accepted on the fallback path only. Validation tries the
//! cookie-bound identity first, then the legacy one, so clients that have
//! not yet received the cookie keep working.

use crate::security;
use axum::http::{header, HeaderMap};

/// Cookie that carries the preferred client identity.
pub const CLIENT_ID_COOKIE: &str = "inkboard_client_id";

const LEGACY_IDENTITY_MAX_LENGTH: usize = 256;
const CLIENT_ID_MIN_LENGTH: usize = 16;
const CLIENT_ID_MAX_LENGTH: usize = 128;

/// Candidate identities resolved from one request.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    /// Valid cookie-carried identity, when the request brought one.
    pub cookie: Option<String>,
    /// Identity minted for this request because no valid cookie arrived.
    pub minted: Option<String>,
    /// Legacy `ip:user_agent` identity, always computable.
    pub legacy: String,
}

impl ClientIdentity {
    /// Resolve the identity candidates from request headers.
    pub fn resolve(headers: &HeaderMap) -> Self {
        let cookie =
            cookie_value(headers, CLIENT_ID_COOKIE).filter(|value| is_valid_client_id(value));
        let minted = match cookie {
            Some(_) => None,
            None => Some(mint_client_id()),
        };
        Self {
            cookie,
            minted,
            legacy: legacy_identity(headers),
        }
    }

    /// The identity new tokens are bound to: the existing cookie value, or
    /// the value minted for this request.
    pub fn effective(&self) -> &str {
        self.cookie
            .as_deref()
            .or(self.minted.as_deref())
            .unwrap_or(&self.legacy)
    }

    /// Identities tried at validation time, cookie-bound first. A freshly
    /// minted value is never a candidate - no previously issued token can
    /// be bound to it.
    pub fn candidates(&self) -> Vec<&str> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(cookie) = self.cookie.as_deref() {
            candidates.push(cookie);
        }
        candidates.push(self.legacy.as_str());
        candidates
    }

    /// `Set-Cookie` value that persists (or refreshes) the identity.
    pub fn set_cookie_header(&self) -> String {
        format!(
            "{}={}; Path=/; Max-Age=31536000; HttpOnly; SameSite=Lax",
            CLIENT_ID_COOKIE,
            self.effective()
        )
    }
}

/// Extract a cookie value from the Cookie header.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for cookie in cookie_header.split(';') {
        let cookie = cookie.trim();
        if let Some(value) = cookie.strip_prefix(name) {
            if let Some(value) = value.strip_prefix('=') {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Restricted charset and bounded length; anything else is treated as if
/// no cookie was sent.
fn is_valid_client_id(value: &str) -> bool {
    (CLIENT_ID_MIN_LENGTH..=CLIENT_ID_MAX_LENGTH).contains(&value.len())
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn mint_client_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn legacy_identity(headers: &HeaderMap) -> String {
    let ip = security::client_ip(headers);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    format!("{}:{}", ip, user_agent)
        .chars()
        .take(LEGACY_IDENTITY_MAX_LENGTH)
        .collect()
}
