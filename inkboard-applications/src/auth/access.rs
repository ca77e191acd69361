//! Effective access resolution
//!
//! `AccessResolver` is the single decision point for "what may this
//! principal do with this drawing". It composes ownership, ACL grants and
//! the active link share into one access level.

use crate::store::{DrawingDirectory, DrawingRecord};
use chrono::{DateTime, Utc};
use inkboard_core::{DrawingAccess, InkboardResult, Principal};
use std::sync::Arc;
use tracing::debug;

/// Resolves the effective access level for a (principal, drawing) pair.
pub struct AccessResolver {
    directory: Arc<dyn DrawingDirectory>,
}

impl AccessResolver {
    pub fn new(directory: Arc<dyn DrawingDirectory>) -> Self {
        Self { directory }
    }

    /// Resolve the effective access level at `now`.
    ///
    /// A missing drawing resolves to `None` rather than an error, so the
    /// presence or absence of a drawing cannot be distinguished by error
    /// type. The owner short-circuits to `Owner`, which is already maximal;
    /// everyone else gets `max(acl grant, active link share)`.
    pub async fn resolve(
        &self,
        principal: &Principal,
        drawing_id: &str,
        now: DateTime<Utc>,
    ) -> InkboardResult<DrawingAccess> {
        let Some(owner_id) = self.directory.drawing_owner(drawing_id).await? else {
            return Ok(DrawingAccess::None);
        };

        if principal.user_id() == Some(owner_id.as_str()) {
            return Ok(DrawingAccess::Owner);
        }

        let base = match principal.user_id() {
            Some(user_id) => self
                .directory
                .acl_entry(drawing_id, user_id)
                .await?
                .map(|entry| entry.level.access())
                .unwrap_or(DrawingAccess::None),
            None => DrawingAccess::None,
        };

        // Link policy applies to anonymous visitors too, so this lookup
        // runs regardless of authentication.
        let link = self
            .directory
            .active_link_share(drawing_id, now)
            .await?
            .map(|share| share.permission.access())
            .unwrap_or(DrawingAccess::None);

        let access = base.combine(link);
        debug!(
            principal = %principal,
            drawing_id,
            %base,
            %link,
            %access,
            "Resolved drawing access"
        );
        Ok(access)
    }

    /// List drawings shared with the given user through ACL entries.
    ///
    /// Drawings the user owns never appear here, even when a
    /// self-referential ACL row exists.
    pub async fn shared_with_me(&self, user_id: &str) -> InkboardResult<Vec<DrawingRecord>> {
        self.directory.shared_with_me(user_id).await
    }
}
