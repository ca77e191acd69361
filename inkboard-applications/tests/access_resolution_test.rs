//! Access resolution and link-share invariant tests
//!
//! Exercises the composed decision path: ownership short-circuit, ACL
//! grants, link-share policy and the single-active-share invariant.

use chrono::{Duration, Utc};
use inkboard_applications::{
    AccessResolver, AclEntry, DrawingDirectory, DrawingRecord, InMemoryDirectory, LinkSharePolicy,
    LinkSharePolicyStore,
};
use inkboard_core::{DrawingAccess, GrantLevel, Principal};
use std::sync::Arc;

async fn directory_with_drawing(drawing_id: &str, owner_id: &str) -> Arc<InMemoryDirectory> {
    let directory = Arc::new(InMemoryDirectory::new());
    directory
        .create_drawing(DrawingRecord::new(drawing_id, owner_id, "Untitled"))
        .await
        .unwrap();
    directory
}

#[tokio::test]
async fn owner_always_resolves_to_owner() {
    let directory = directory_with_drawing("d1", "u1").await;
    let resolver = AccessResolver::new(directory.clone());

    // A self-referential ACL row granting a lesser permission is ignored.
    directory
        .upsert_acl_entry(AclEntry::new("d1", "u1", GrantLevel::View))
        .await
        .unwrap();

    let access = resolver
        .resolve(&Principal::User("u1".to_string()), "d1", Utc::now())
        .await
        .unwrap();
    assert_eq!(access, DrawingAccess::Owner);
}

#[tokio::test]
async fn missing_drawing_resolves_to_none() {
    let directory = Arc::new(InMemoryDirectory::new());
    let resolver = AccessResolver::new(directory);

    let access = resolver
        .resolve(&Principal::Anonymous, "no-such-drawing", Utc::now())
        .await
        .unwrap();
    assert_eq!(access, DrawingAccess::None);

    // Same outcome for an authenticated stranger: absence is data.
    let directory = directory_with_drawing("d1", "u1").await;
    let resolver = AccessResolver::new(directory);
    let access = resolver
        .resolve(&Principal::User("u2".to_string()), "d1", Utc::now())
        .await
        .unwrap();
    assert_eq!(access, DrawingAccess::None);
}

#[tokio::test]
async fn acl_grant_sets_base_access() {
    let directory = directory_with_drawing("d1", "u1").await;
    directory
        .upsert_acl_entry(AclEntry::new("d1", "u2", GrantLevel::Edit))
        .await
        .unwrap();
    let resolver = AccessResolver::new(directory);

    let access = resolver
        .resolve(&Principal::User("u2".to_string()), "d1", Utc::now())
        .await
        .unwrap();
    assert_eq!(access, DrawingAccess::Edit);
}

#[tokio::test]
async fn link_share_grants_anonymous_access_until_revoked() {
    let directory = directory_with_drawing("d1", "u1").await;
    let resolver = AccessResolver::new(directory.clone());
    let shares = LinkSharePolicyStore::new(directory, LinkSharePolicy::default());
    let now = Utc::now();

    let access = resolver.resolve(&Principal::Anonymous, "d1", now).await.unwrap();
    assert_eq!(access, DrawingAccess::None);

    let share = shares
        .create_or_replace("d1", GrantLevel::View, None, now)
        .await
        .unwrap();
    let access = resolver.resolve(&Principal::Anonymous, "d1", now).await.unwrap();
    assert_eq!(access, DrawingAccess::View);

    shares.revoke("d1", &share.id, now).await.unwrap();
    let access = resolver.resolve(&Principal::Anonymous, "d1", now).await.unwrap();
    assert_eq!(access, DrawingAccess::None);
}

#[tokio::test]
async fn link_share_combines_with_acl_by_max() {
    let directory = directory_with_drawing("d1", "u1").await;
    directory
        .upsert_acl_entry(AclEntry::new("d1", "u2", GrantLevel::View))
        .await
        .unwrap();
    let resolver = AccessResolver::new(directory.clone());
    let shares = LinkSharePolicyStore::new(directory, LinkSharePolicy::default());
    let now = Utc::now();

    shares
        .create_or_replace("d1", GrantLevel::Edit, None, now)
        .await
        .unwrap();

    // View from the ACL, edit from the link: the higher rank wins.
    let access = resolver
        .resolve(&Principal::User("u2".to_string()), "d1", now)
        .await
        .unwrap();
    assert_eq!(access, DrawingAccess::Edit);
}

#[tokio::test]
async fn creating_a_share_revokes_the_previous_one() {
    let directory = directory_with_drawing("d1", "u1").await;
    let shares = LinkSharePolicyStore::new(directory.clone(), LinkSharePolicy::default());
    let now = Utc::now();

    shares
        .create_or_replace("d1", GrantLevel::View, None, now)
        .await
        .unwrap();
    shares
        .create_or_replace("d1", GrantLevel::Edit, None, now + Duration::seconds(1))
        .await
        .unwrap();

    let history = directory.link_share_history("d1").await.unwrap();
    assert_eq!(history.len(), 2);

    let active: Vec<_> = history
        .iter()
        .filter(|share| share.revoked_at.is_none())
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].permission, GrantLevel::Edit);
}

#[tokio::test]
async fn single_active_share_after_any_sequence() {
    let directory = directory_with_drawing("d1", "u1").await;
    let shares = LinkSharePolicyStore::new(directory.clone(), LinkSharePolicy::default());
    let mut now = Utc::now();

    for round in 0..5 {
        let level = if round % 2 == 0 {
            GrantLevel::View
        } else {
            GrantLevel::Edit
        };
        let share = shares
            .create_or_replace("d1", level, Some(3600), now)
            .await
            .unwrap();
        if round == 2 {
            shares.revoke("d1", &share.id, now).await.unwrap();
            // Idempotent: revoking again, or revoking garbage, still succeeds.
            shares.revoke("d1", &share.id, now).await.unwrap();
            shares.revoke("d1", "not-a-share", now).await.unwrap();
        }
        now += Duration::seconds(1);

        let active: Vec<_> = directory
            .link_share_history("d1")
            .await
            .unwrap()
            .into_iter()
            .filter(|share| share.is_active(now))
            .collect();
        assert!(active.len() <= 1, "round {}: {} active shares", round, active.len());
    }
}

#[tokio::test]
async fn expired_share_grants_nothing() {
    let directory = directory_with_drawing("d1", "u1").await;
    let resolver = AccessResolver::new(directory.clone());
    let shares = LinkSharePolicyStore::new(directory, LinkSharePolicy::default());
    let now = Utc::now();

    shares
        .create_or_replace("d1", GrantLevel::View, Some(60), now)
        .await
        .unwrap();

    let access = resolver.resolve(&Principal::Anonymous, "d1", now).await.unwrap();
    assert_eq!(access, DrawingAccess::View);

    let later = now + Duration::seconds(61);
    let access = resolver.resolve(&Principal::Anonymous, "d1", later).await.unwrap();
    assert_eq!(access, DrawingAccess::None);
}

#[tokio::test]
async fn shared_with_me_excludes_own_drawings() {
    let directory = Arc::new(InMemoryDirectory::new());
    directory
        .create_drawing(DrawingRecord::new("mine", "u2", "Mine"))
        .await
        .unwrap();
    directory
        .create_drawing(DrawingRecord::new("theirs", "u1", "Theirs"))
        .await
        .unwrap();

    // Self-grant on the user's own drawing plus a real grant from u1.
    directory
        .upsert_acl_entry(AclEntry::new("mine", "u2", GrantLevel::Edit))
        .await
        .unwrap();
    directory
        .upsert_acl_entry(AclEntry::new("theirs", "u2", GrantLevel::View))
        .await
        .unwrap();

    let resolver = AccessResolver::new(directory);
    let shared = resolver.shared_with_me("u2").await.unwrap();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].id, "theirs");
}
