//! In-memory directory for tests and small single-process deployments

use super::{DrawingDirectory, DrawingRecord};
use crate::auth::{AclEntry, LinkShare};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inkboard_core::InkboardResult;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct DirectoryState {
    drawings: HashMap<String, DrawingRecord>,
    // keyed by (drawing_id, user_id)
    acl: HashMap<(String, String), AclEntry>,
    link_shares: Vec<LinkShare>,
}

/// Map-backed [`DrawingDirectory`].
///
/// A single write guard covers the whole revoke-then-insert sequence, so
/// the single-active-share invariant holds without a transaction.
#[derive(Default)]
pub struct InMemoryDirectory {
    inner: RwLock<DirectoryState>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DrawingDirectory for InMemoryDirectory {
    async fn create_drawing(&self, drawing: DrawingRecord) -> InkboardResult<()> {
        let mut state = self.inner.write().await;
        state.drawings.insert(drawing.id.clone(), drawing);
        Ok(())
    }

    async fn drawing_owner(&self, drawing_id: &str) -> InkboardResult<Option<String>> {
        let state = self.inner.read().await;
        Ok(state
            .drawings
            .get(drawing_id)
            .map(|drawing| drawing.owner_id.clone()))
    }

    async fn acl_entry(
        &self,
        drawing_id: &str,
        user_id: &str,
    ) -> InkboardResult<Option<AclEntry>> {
        let state = self.inner.read().await;
        Ok(state
            .acl
            .get(&(drawing_id.to_string(), user_id.to_string()))
            .cloned())
    }

    async fn upsert_acl_entry(&self, entry: AclEntry) -> InkboardResult<()> {
        let mut state = self.inner.write().await;
        state
            .acl
            .insert((entry.drawing_id.clone(), entry.user_id.clone()), entry);
        Ok(())
    }

    async fn remove_acl_entry(&self, drawing_id: &str, user_id: &str) -> InkboardResult<()> {
        let mut state = self.inner.write().await;
        state
            .acl
            .remove(&(drawing_id.to_string(), user_id.to_string()));
        Ok(())
    }

    async fn active_link_share(
        &self,
        drawing_id: &str,
        now: DateTime<Utc>,
    ) -> InkboardResult<Option<LinkShare>> {
        let state = self.inner.read().await;
        Ok(state
            .link_shares
            .iter()
            .filter(|share| share.drawing_id == drawing_id && share.is_active(now))
            .max_by_key(|share| share.created_at)
            .cloned())
    }

    async fn replace_active_link_share(
        &self,
        share: LinkShare,
        now: DateTime<Utc>,
    ) -> InkboardResult<LinkShare> {
        let mut state = self.inner.write().await;
        for existing in state
            .link_shares
            .iter_mut()
            .filter(|existing| existing.drawing_id == share.drawing_id && existing.is_active(now))
        {
            existing.revoked_at = Some(now);
        }
        state.link_shares.push(share.clone());
        Ok(share)
    }

    async fn revoke_link_share(
        &self,
        drawing_id: &str,
        share_id: &str,
        now: DateTime<Utc>,
    ) -> InkboardResult<()> {
        let mut state = self.inner.write().await;
        if let Some(share) = state
            .link_shares
            .iter_mut()
            .find(|share| share.drawing_id == drawing_id && share.id == share_id)
        {
            if share.revoked_at.is_none() {
                share.revoked_at = Some(now);
            }
        }
        Ok(())
    }

    async fn link_share_history(&self, drawing_id: &str) -> InkboardResult<Vec<LinkShare>> {
        let state = self.inner.read().await;
        let mut shares: Vec<LinkShare> = state
            .link_shares
            .iter()
            .filter(|share| share.drawing_id == drawing_id)
            .cloned()
            .collect();
        shares.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(shares)
    }

    async fn shared_with_me(&self, user_id: &str) -> InkboardResult<Vec<DrawingRecord>> {
        let state = self.inner.read().await;
        let mut drawings: Vec<DrawingRecord> = state
            .acl
            .values()
            .filter(|entry| entry.user_id == user_id)
            .filter_map(|entry| state.drawings.get(&entry.drawing_id))
            // Drawings the user owns never count as "shared with me", even
            // when a self-referential ACL row exists.
            .filter(|drawing| drawing.owner_id != user_id)
            .cloned()
            .collect();
        drawings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(drawings)
    }
}
