//! Persistent-store interface
//!
//! The relational store is an external collaborator; this trait is the
//! exact surface the authorization core consumes. Implementations must make
//! `replace_active_link_share` atomic: no observable window may exist where
//! two shares are simultaneously active for one drawing.

pub mod memory;

use async_trait::async_trait;
use crate::auth::{AclEntry, LinkShare};
use chrono::{DateTime, Utc};
use inkboard_core::InkboardResult;
use serde::{Deserialize, Serialize};

pub use memory::InMemoryDirectory;

/// A drawing row as the authorization layer sees it.
///
/// Only `owner_id` is authorization-relevant; the remaining fields exist so
/// listings have something real to return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawingRecord {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl DrawingRecord {
    pub fn new(id: &str, owner_id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Store operations consumed by the authorization subsystem.
#[async_trait]
pub trait DrawingDirectory: Send + Sync {
    /// Insert a drawing row.
    async fn create_drawing(&self, drawing: DrawingRecord) -> InkboardResult<()>;

    /// Owner account id of a drawing, `None` when the drawing does not exist.
    async fn drawing_owner(&self, drawing_id: &str) -> InkboardResult<Option<String>>;

    /// The ACL entry for (drawing, user), if any.
    async fn acl_entry(
        &self,
        drawing_id: &str,
        user_id: &str,
    ) -> InkboardResult<Option<AclEntry>>;

    /// Create or overwrite an ACL entry.
    async fn upsert_acl_entry(&self, entry: AclEntry) -> InkboardResult<()>;

    /// Delete an ACL entry; missing entries are a no-op.
    async fn remove_acl_entry(&self, drawing_id: &str, user_id: &str) -> InkboardResult<()>;

    /// The most recently created share that is active at `now`, if any.
    async fn active_link_share(
        &self,
        drawing_id: &str,
        now: DateTime<Utc>,
    ) -> InkboardResult<Option<LinkShare>>;

    /// Atomically revoke every active share for the drawing and insert the
    /// given one as the sole active share.
    async fn replace_active_link_share(
        &self,
        share: LinkShare,
        now: DateTime<Utc>,
    ) -> InkboardResult<LinkShare>;

    /// Soft-revoke a share by id. Already-revoked or unknown shares are a
    /// no-op success.
    async fn revoke_link_share(
        &self,
        drawing_id: &str,
        share_id: &str,
        now: DateTime<Utc>,
    ) -> InkboardResult<()>;

    /// All shares ever created for a drawing, most recent first.
    async fn link_share_history(&self, drawing_id: &str) -> InkboardResult<Vec<LinkShare>>;

    /// Drawings shared with `user_id` via ACL entries, excluding drawings
    /// the user owns.
    async fn shared_with_me(&self, user_id: &str) -> InkboardResult<Vec<DrawingRecord>>;
}
