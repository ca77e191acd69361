//! "Anyone with the link" sharing policy
//!
//! A link share grants access to anyone who has the drawing's identifier,
//! independent of authentication. Per drawing at most one share is active
//! at any time; creating a new one revokes every previously active share.
//! Revocation is soft - `revoked_at` is set, rows are never deleted - so
//! the audit history is preserved.

use crate::store::DrawingDirectory;
use chrono::{DateTime, Duration, Utc};
use inkboard_core::{GrantLevel, InkboardResult, LinkShareConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// A link-share policy row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkShare {
    pub id: String,
    pub drawing_id: String,
    pub permission: GrantLevel,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl LinkShare {
    /// Whether this share grants access at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.map_or(true, |expires| expires > now)
    }
}

/// TTL policy applied when a share is created.
///
/// `view` shares default to no expiry. `edit` shares default to a bounded
/// window because unauthenticated mutation access is higher risk. Explicit
/// requests are clamped silently into `[min_ttl, max_ttl]`.
#[derive(Debug, Clone)]
pub struct LinkSharePolicy {
    edit_default_ttl: Duration,
    min_ttl: Duration,
    max_ttl: Duration,
}

impl LinkSharePolicy {
    pub fn from_config(config: &LinkShareConfig) -> Self {
        Self {
            edit_default_ttl: Duration::seconds(config.edit_default_ttl_secs),
            min_ttl: Duration::seconds(config.min_ttl_secs),
            max_ttl: Duration::seconds(config.max_ttl_secs),
        }
    }

    /// Compute the expiry a new share gets.
    pub fn effective_expiry(
        &self,
        permission: GrantLevel,
        requested_secs: Option<i64>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match requested_secs {
            Some(secs) => {
                let clamped = secs
                    .max(self.min_ttl.num_seconds())
                    .min(self.max_ttl.num_seconds());
                Some(now + Duration::seconds(clamped))
            }
            None => match permission {
                GrantLevel::View => None,
                GrantLevel::Edit => Some(now + self.edit_default_ttl),
            },
        }
    }
}

impl Default for LinkSharePolicy {
    fn default() -> Self {
        Self::from_config(&inkboard_core::InkboardConfig::default().link_shares)
    }
}

/// Manages the single-active-share invariant per drawing.
pub struct LinkSharePolicyStore {
    directory: Arc<dyn DrawingDirectory>,
    policy: LinkSharePolicy,
}

impl LinkSharePolicyStore {
    pub fn new(directory: Arc<dyn DrawingDirectory>, policy: LinkSharePolicy) -> Self {
        Self { directory, policy }
    }

    /// Create a new active share, revoking every previously active share
    /// for the drawing in the same store operation.
    pub async fn create_or_replace(
        &self,
        drawing_id: &str,
        permission: GrantLevel,
        requested_expiry_secs: Option<i64>,
        now: DateTime<Utc>,
    ) -> InkboardResult<LinkShare> {
        let share = LinkShare {
            id: uuid::Uuid::new_v4().to_string(),
            drawing_id: drawing_id.to_string(),
            permission,
            created_at: now,
            expires_at: self
                .policy
                .effective_expiry(permission, requested_expiry_secs, now),
            revoked_at: None,
        };

        let share = self.directory.replace_active_link_share(share, now).await?;
        info!(
            drawing_id,
            share_id = %share.id,
            permission = %share.permission,
            expires_at = ?share.expires_at,
            "Link share created"
        );
        Ok(share)
    }

    /// Revoke a share. Revoking an already-revoked or nonexistent share is
    /// a no-op success.
    pub async fn revoke(
        &self,
        drawing_id: &str,
        share_id: &str,
        now: DateTime<Utc>,
    ) -> InkboardResult<()> {
        self.directory
            .revoke_link_share(drawing_id, share_id, now)
            .await?;
        info!(drawing_id, share_id, "Link share revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LinkSharePolicy {
        LinkSharePolicy::from_config(&LinkShareConfig {
            edit_default_ttl_secs: 7 * 24 * 60 * 60,
            min_ttl_secs: 60,
            max_ttl_secs: 90 * 24 * 60 * 60,
        })
    }

    #[test]
    fn view_defaults_to_no_expiry() {
        let now = Utc::now();
        assert_eq!(policy().effective_expiry(GrantLevel::View, None, now), None);
    }

    #[test]
    fn edit_defaults_to_bounded_window() {
        let now = Utc::now();
        let expiry = policy()
            .effective_expiry(GrantLevel::Edit, None, now)
            .unwrap();
        assert_eq!(expiry, now + Duration::days(7));
    }

    #[test]
    fn explicit_expiry_clamps_low() {
        let now = Utc::now();
        let expiry = policy()
            .effective_expiry(GrantLevel::View, Some(5), now)
            .unwrap();
        assert_eq!(expiry, now + Duration::seconds(60));
    }

    #[test]
    fn explicit_expiry_clamps_high() {
        let now = Utc::now();
        let expiry = policy()
            .effective_expiry(GrantLevel::Edit, Some(400 * 24 * 60 * 60), now)
            .unwrap();
        assert_eq!(expiry, now + Duration::days(90));
    }

    #[test]
    fn explicit_expiry_in_range_is_kept() {
        let now = Utc::now();
        let expiry = policy()
            .effective_expiry(GrantLevel::View, Some(3600), now)
            .unwrap();
        assert_eq!(expiry, now + Duration::seconds(3600));
    }

    #[test]
    fn share_activity_window() {
        let now = Utc::now();
        let mut share = LinkShare {
            id: "s1".to_string(),
            drawing_id: "d1".to_string(),
            permission: GrantLevel::View,
            created_at: now,
            expires_at: None,
            revoked_at: None,
        };
        assert!(share.is_active(now));

        share.expires_at = Some(now + Duration::seconds(1));
        assert!(share.is_active(now));
        assert!(!share.is_active(now + Duration::seconds(2)));

        share.revoked_at = Some(now);
        assert!(!share.is_active(now));
    }
}
