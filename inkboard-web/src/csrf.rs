//! Stateless CSRF token service
//!
//! Tokens are signed with HMAC-SHA256 over `"{client_id}|{ts}|{nonce}"` and
//! carry no server-side state: any instance holding the same secret can
//! validate a token issued by any other instance, which is what makes the
//! scheme work across horizontally scaled deployments without sticky
//! sessions or a shared cache.
//!
//! Because tokens are stateless, revoking a single token is not possible
//! without adding shared storage. Logout-time revocation is therefore an
//! intentional no-op; see [`CsrfTokenService::revoke_on_logout`].

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use inkboard_core::{CsrfConfig, InkboardResult};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::LazyLock;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Header that carries the token on mutation requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Tokens longer than this are rejected before any parsing.
const MAX_TOKEN_LENGTH: usize = 2048;
/// Payloads with a shorter nonce are rejected.
const MIN_NONCE_LENGTH: usize = 8;

/// Process-wide signing secret.
///
/// Must be identical across every instance that shares validation
/// responsibility. When unset, an ephemeral secret keeps a single instance
/// working, but horizontal validation and token survival across restarts
/// are silently broken - hence the loud warning.
static SIGNING_SECRET: LazyLock<Vec<u8>> = LazyLock::new(|| {
    match std::env::var("INKBOARD_CSRF_SECRET") {
        Ok(secret) if !secret.is_empty() => secret.into_bytes(),
        _ => {
            warn!(
                "INKBOARD_CSRF_SECRET is not set; using an ephemeral secret. \
                 CSRF tokens will not validate on other instances or after a restart."
            );
            let mut secret = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut secret);
            secret
        }
    }
});

/// Signed token payload. Lifetime is computed from `ts`, never stored.
#[derive(Debug, Serialize, Deserialize)]
struct TokenPayload {
    /// Issuance time in unix milliseconds
    ts: i64,
    /// Random per-token value
    nonce: String,
}

/// Issues and validates stateless CSRF tokens bound to a client identity.
pub struct CsrfTokenService {
    secret: Vec<u8>,
    token_ttl: Duration,
    future_skew: Duration,
}

impl CsrfTokenService {
    pub fn new(config: &CsrfConfig) -> Self {
        Self::with_secret(SIGNING_SECRET.clone(), config)
    }

    /// Construct with an explicit secret. Instances sharing a secret
    /// validate each other's tokens.
    pub fn with_secret(secret: Vec<u8>, config: &CsrfConfig) -> Self {
        Self {
            secret,
            token_ttl: Duration::hours(config.token_ttl_hours),
            future_skew: Duration::seconds(config.future_skew_secs),
        }
    }

    /// Issue a token bound to `client_id`.
    pub fn issue(&self, client_id: &str) -> InkboardResult<String> {
        self.issue_at(client_id, Utc::now())
    }

    fn issue_at(&self, client_id: &str, now: DateTime<Utc>) -> InkboardResult<String> {
        let payload = TokenPayload {
            ts: now.timestamp_millis(),
            nonce: uuid::Uuid::new_v4().simple().to_string(),
        };
        let body = serde_json::to_vec(&payload)?;
        let signature = self.sign(client_id, payload.ts, &payload.nonce);
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&body),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Validate a token against a single client identity.
    pub fn validate(&self, client_id: &str, token: &str) -> bool {
        self.validate_at(client_id, token, Utc::now())
    }

    /// Validate against an ordered list of candidate identities, accepting
    /// the token if it validates against any of them.
    pub fn validate_any<S: AsRef<str>>(&self, candidates: &[S], token: &str) -> bool {
        let now = Utc::now();
        candidates
            .iter()
            .any(|client_id| self.validate_at(client_id.as_ref(), token, now))
    }

    fn validate_at(&self, client_id: &str, token: &str, now: DateTime<Utc>) -> bool {
        if token.len() > MAX_TOKEN_LENGTH {
            return false;
        }

        let mut parts = token.split('.');
        let (Some(payload_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next())
        else {
            return false;
        };

        let Ok(payload_bytes) = URL_SAFE_NO_PAD.decode(payload_b64) else {
            return false;
        };
        let Ok(payload) = serde_json::from_slice::<TokenPayload>(&payload_bytes) else {
            return false;
        };
        if payload.nonce.len() < MIN_NONCE_LENGTH {
            return false;
        }
        let Some(issued_at) = Utc.timestamp_millis_opt(payload.ts).single() else {
            return false;
        };

        // Expired, or claiming to come from the future beyond clock skew.
        if now - issued_at > self.token_ttl {
            return false;
        }
        if issued_at - now > self.future_skew {
            return false;
        }

        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature_b64) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(signing_message(client_id, payload.ts, &payload.nonce).as_bytes());
        // Constant-time comparison; any length or byte mismatch is invalid.
        mac.verify_slice(&signature).is_ok()
    }

    fn sign(&self, client_id: &str, ts: i64, nonce: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(signing_message(client_id, ts, nonce).as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Deliberate no-op: single-token revocation would require shared
    /// storage, defeating the stateless design. Tokens die by expiry.
    pub fn revoke_on_logout(&self, _token: &str) {}
}

fn signing_message(client_id: &str, ts: i64, nonce: &str) -> String {
    format!("{}|{}|{}", client_id, ts, nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CsrfTokenService {
        CsrfTokenService::with_secret(b"test-secret".to_vec(), &test_config())
    }

    fn test_config() -> CsrfConfig {
        CsrfConfig {
            token_ttl_hours: 24,
            future_skew_secs: 300,
            issue_rate_per_minute: 30,
            allowed_origins: vec![],
            dev_mode: false,
        }
    }

    #[test]
    fn issued_token_validates_immediately() {
        let service = service();
        let token = service.issue("client-a").unwrap();
        assert!(service.validate("client-a", &token));
    }

    #[test]
    fn token_is_bound_to_client_identity() {
        let service = service();
        let token = service.issue("client-a").unwrap();
        assert!(!service.validate("client-b", &token));
    }

    #[test]
    fn any_instance_with_the_secret_validates() {
        let issuer = CsrfTokenService::with_secret(b"shared".to_vec(), &test_config());
        let validator = CsrfTokenService::with_secret(b"shared".to_vec(), &test_config());
        let stranger = CsrfTokenService::with_secret(b"other".to_vec(), &test_config());

        let token = issuer.issue("client-a").unwrap();
        assert!(validator.validate("client-a", &token));
        assert!(!stranger.validate("client-a", &token));
    }

    #[test]
    fn expiry_boundary() {
        let service = service();
        let issued = Utc::now();
        let token = service.issue_at("client-a", issued).unwrap();

        let just_before = issued + Duration::hours(23) + Duration::minutes(59);
        assert!(service.validate_at("client-a", &token, just_before));

        let at_limit = issued + Duration::hours(24);
        assert!(service.validate_at("client-a", &token, at_limit));

        let just_after = issued + Duration::hours(24) + Duration::seconds(1);
        assert!(!service.validate_at("client-a", &token, just_after));
    }

    #[test]
    fn rejects_tokens_from_the_future() {
        let service = service();
        let now = Utc::now();

        let slightly_ahead = service.issue_at("client-a", now + Duration::minutes(4)).unwrap();
        assert!(service.validate_at("client-a", &slightly_ahead, now));

        let far_ahead = service.issue_at("client-a", now + Duration::minutes(6)).unwrap();
        assert!(!service.validate_at("client-a", &far_ahead, now));
    }

    #[test]
    fn rejects_malformed_tokens() {
        let service = service();
        assert!(!service.validate("client-a", ""));
        assert!(!service.validate("client-a", "no-dot-here"));
        assert!(!service.validate("client-a", "a.b.c"));
        assert!(!service.validate("client-a", "!!!.###"));
        assert!(!service.validate("client-a", &"x".repeat(3000)));

        // Well-formed base64 carrying garbage payload.
        let payload = URL_SAFE_NO_PAD.encode(b"{\"not\":\"a token\"}");
        let signature = URL_SAFE_NO_PAD.encode(b"nope");
        assert!(!service.validate("client-a", &format!("{}.{}", payload, signature)));
    }

    #[test]
    fn rejects_short_nonce() {
        let service = service();
        let ts = Utc::now().timestamp_millis();
        let payload = serde_json::json!({"ts": ts, "nonce": "short"});
        let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(service.sign("client-a", ts, "short"));
        // Correctly signed, but the nonce is below the minimum length.
        assert!(!service.validate("client-a", &format!("{}.{}", body, signature)));
    }

    #[test]
    fn rejects_tampered_signature() {
        let service = service();
        let token = service.issue("client-a").unwrap();
        let mut tampered = token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        assert!(!service.validate("client-a", &tampered));
    }

    #[test]
    fn validate_any_tries_each_candidate() {
        let service = service();
        let token = service.issue("legacy-id").unwrap();
        assert!(service.validate_any(&["cookie-id", "legacy-id"], &token));
        assert!(!service.validate_any(&["cookie-id", "other-id"], &token));
        assert!(!service.validate_any::<&str>(&[], &token));
    }
}
