//! SQLite-backed drawing directory
//!
//! Persistence for drawings, ACL entries and link shares. The
//! revoke-then-create sequence behind the single-active-share invariant
//! runs inside one transaction, so no window exists where two shares are
//! active for the same drawing.

use crate::{WebError, WebResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use inkboard_applications::{AclEntry, DrawingDirectory, DrawingRecord, LinkShare};
use inkboard_core::{storage_error, GrantLevel, InkboardResult};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Row, SqlitePool,
};

/// SQLite implementation of [`DrawingDirectory`]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    /// Connect and bootstrap the schema
    pub async fn new(database_url: &str) -> WebResult<Self> {
        tracing::info!("Connecting to database: {}", database_url);

        let pool = if database_url.starts_with("sqlite:") && !database_url.contains(":memory:") {
            let db_path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

            if let Some(parent) = std::path::Path::new(db_path).parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        WebError::Database(format!("Failed to create directory: {}", e))
                    })?;
                }
            }

            let options = SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true);

            SqlitePool::connect_with(options).await.map_err(|e| {
                WebError::Database(format!("Failed to connect to database: {}", e))
            })?
        } else if database_url.contains(":memory:") {
            // One pooled connection: an in-memory database lives and dies
            // with its connection.
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect(database_url)
                .await
                .map_err(|e| {
                    WebError::Database(format!("Failed to connect to database: {}", e))
                })?
        } else {
            SqlitePool::connect(database_url).await.map_err(|e| {
                WebError::Database(format!("Failed to connect to database: {}", e))
            })?
        };

        Self::create_tables(&pool).await?;
        tracing::info!("Database ready");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_tables(pool: &SqlitePool) -> WebResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS drawings (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| WebError::Database(format!("Failed to create drawings table: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS drawing_acl (
                drawing_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                level TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (drawing_id, user_id)
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| WebError::Database(format!("Failed to create drawing_acl table: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS link_shares (
                id TEXT PRIMARY KEY,
                drawing_id TEXT NOT NULL,
                permission TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT,
                revoked_at TEXT
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| WebError::Database(format!("Failed to create link_shares table: {}", e)))?;

        Ok(())
    }
}

/// Fixed-width RFC 3339 so lexicographic comparison in SQL matches
/// chronological order.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> InkboardResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| storage_error!(format!("Invalid stored timestamp {:?}: {}", raw, e), "database"))
}

fn share_from_row(row: &sqlx::sqlite::SqliteRow) -> InkboardResult<LinkShare> {
    let permission: String = row
        .try_get("permission")
        .map_err(|e| storage_error!("Missing permission column", "database", e))?;
    let permission: GrantLevel = permission
        .parse()
        .map_err(|e: String| storage_error!(e, "database"))?;

    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| storage_error!("Missing created_at column", "database", e))?;
    let expires_at: Option<String> = row
        .try_get("expires_at")
        .map_err(|e| storage_error!("Missing expires_at column", "database", e))?;
    let revoked_at: Option<String> = row
        .try_get("revoked_at")
        .map_err(|e| storage_error!("Missing revoked_at column", "database", e))?;

    Ok(LinkShare {
        id: row
            .try_get("id")
            .map_err(|e| storage_error!("Missing id column", "database", e))?,
        drawing_id: row
            .try_get("drawing_id")
            .map_err(|e| storage_error!("Missing drawing_id column", "database", e))?,
        permission,
        created_at: parse_ts(&created_at)?,
        expires_at: expires_at.as_deref().map(parse_ts).transpose()?,
        revoked_at: revoked_at.as_deref().map(parse_ts).transpose()?,
    })
}

fn drawing_from_row(row: &sqlx::sqlite::SqliteRow) -> InkboardResult<DrawingRecord> {
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| storage_error!("Missing created_at column", "database", e))?;
    Ok(DrawingRecord {
        id: row
            .try_get("id")
            .map_err(|e| storage_error!("Missing id column", "database", e))?,
        owner_id: row
            .try_get("owner_id")
            .map_err(|e| storage_error!("Missing owner_id column", "database", e))?,
        name: row
            .try_get("name")
            .map_err(|e| storage_error!("Missing name column", "database", e))?,
        created_at: parse_ts(&created_at)?,
    })
}

#[async_trait]
impl DrawingDirectory for SqliteDirectory {
    async fn create_drawing(&self, drawing: DrawingRecord) -> InkboardResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO drawings (id, owner_id, name, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&drawing.id)
        .bind(&drawing.owner_id)
        .bind(&drawing.name)
        .bind(fmt_ts(drawing.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error!("Failed to save drawing", "database", e))?;
        Ok(())
    }

    async fn drawing_owner(&self, drawing_id: &str) -> InkboardResult<Option<String>> {
        let row = sqlx::query("SELECT owner_id FROM drawings WHERE id = ?")
            .bind(drawing_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| storage_error!("Failed to look up drawing owner", "database", e))?;

        row.map(|row| {
            row.try_get("owner_id")
                .map_err(|e| storage_error!("Missing owner_id column", "database", e))
        })
        .transpose()
    }

    async fn acl_entry(
        &self,
        drawing_id: &str,
        user_id: &str,
    ) -> InkboardResult<Option<AclEntry>> {
        let row = sqlx::query(
            "SELECT drawing_id, user_id, level, created_at FROM drawing_acl \
             WHERE drawing_id = ? AND user_id = ?",
        )
        .bind(drawing_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error!("Failed to look up ACL entry", "database", e))?;

        row.map(|row| {
            let level: String = row
                .try_get("level")
                .map_err(|e| storage_error!("Missing level column", "database", e))?;
            let created_at: String = row
                .try_get("created_at")
                .map_err(|e| storage_error!("Missing created_at column", "database", e))?;
            Ok(AclEntry {
                drawing_id: drawing_id.to_string(),
                user_id: user_id.to_string(),
                level: level.parse().map_err(|e: String| storage_error!(e, "database"))?,
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }

    async fn upsert_acl_entry(&self, entry: AclEntry) -> InkboardResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO drawing_acl (drawing_id, user_id, level, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&entry.drawing_id)
        .bind(&entry.user_id)
        .bind(entry.level.to_string())
        .bind(fmt_ts(entry.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error!("Failed to save ACL entry", "database", e))?;
        Ok(())
    }

    async fn remove_acl_entry(&self, drawing_id: &str, user_id: &str) -> InkboardResult<()> {
        sqlx::query("DELETE FROM drawing_acl WHERE drawing_id = ? AND user_id = ?")
            .bind(drawing_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error!("Failed to delete ACL entry", "database", e))?;
        Ok(())
    }

    async fn active_link_share(
        &self,
        drawing_id: &str,
        now: DateTime<Utc>,
    ) -> InkboardResult<Option<LinkShare>> {
        let row = sqlx::query(
            "SELECT id, drawing_id, permission, created_at, expires_at, revoked_at \
             FROM link_shares \
             WHERE drawing_id = ? AND revoked_at IS NULL \
               AND (expires_at IS NULL OR expires_at > ?) \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(drawing_id)
        .bind(fmt_ts(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error!("Failed to look up link share", "database", e))?;

        row.map(|row| share_from_row(&row)).transpose()
    }

    async fn replace_active_link_share(
        &self,
        share: LinkShare,
        now: DateTime<Utc>,
    ) -> InkboardResult<LinkShare> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error!("Failed to begin transaction", "database", e))?;

        sqlx::query(
            "UPDATE link_shares SET revoked_at = ? \
             WHERE drawing_id = ? AND revoked_at IS NULL \
               AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(fmt_ts(now))
        .bind(&share.drawing_id)
        .bind(fmt_ts(now))
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error!("Failed to revoke previous shares", "database", e))?;

        sqlx::query(
            "INSERT INTO link_shares (id, drawing_id, permission, created_at, expires_at, revoked_at) \
             VALUES (?, ?, ?, ?, ?, NULL)",
        )
        .bind(&share.id)
        .bind(&share.drawing_id)
        .bind(share.permission.to_string())
        .bind(fmt_ts(share.created_at))
        .bind(share.expires_at.map(fmt_ts))
        .execute(&mut *tx)
        .await
        .map_err(|e| storage_error!("Failed to insert link share", "database", e))?;

        tx.commit()
            .await
            .map_err(|e| storage_error!("Failed to commit link share", "database", e))?;

        Ok(share)
    }

    async fn revoke_link_share(
        &self,
        drawing_id: &str,
        share_id: &str,
        now: DateTime<Utc>,
    ) -> InkboardResult<()> {
        // Idempotent: matching zero rows is success.
        sqlx::query(
            "UPDATE link_shares SET revoked_at = ? \
             WHERE drawing_id = ? AND id = ? AND revoked_at IS NULL",
        )
        .bind(fmt_ts(now))
        .bind(drawing_id)
        .bind(share_id)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error!("Failed to revoke link share", "database", e))?;
        Ok(())
    }

    async fn link_share_history(&self, drawing_id: &str) -> InkboardResult<Vec<LinkShare>> {
        let rows = sqlx::query(
            "SELECT id, drawing_id, permission, created_at, expires_at, revoked_at \
             FROM link_shares WHERE drawing_id = ? ORDER BY created_at DESC",
        )
        .bind(drawing_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error!("Failed to list link shares", "database", e))?;

        rows.iter().map(share_from_row).collect()
    }

    async fn shared_with_me(&self, user_id: &str) -> InkboardResult<Vec<DrawingRecord>> {
        // Drawings the user owns are excluded even when a self-referential
        // ACL row exists.
        let rows = sqlx::query(
            "SELECT d.id, d.owner_id, d.name, d.created_at \
             FROM drawings d \
             INNER JOIN drawing_acl a ON a.drawing_id = d.id \
             WHERE a.user_id = ? AND d.owner_id <> ? \
             ORDER BY d.created_at DESC",
        )
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error!("Failed to list shared drawings", "database", e))?;

        rows.iter().map(drawing_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use inkboard_core::Principal;

    async fn directory() -> SqliteDirectory {
        SqliteDirectory::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn drawing_round_trip() {
        let directory = directory().await;
        directory
            .create_drawing(DrawingRecord::new("d1", "u1", "Board"))
            .await
            .unwrap();

        assert_eq!(
            directory.drawing_owner("d1").await.unwrap().as_deref(),
            Some("u1")
        );
        assert!(directory.drawing_owner("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn acl_round_trip() {
        let directory = directory().await;
        directory
            .upsert_acl_entry(AclEntry::new("d1", "u2", GrantLevel::View))
            .await
            .unwrap();

        let entry = directory.acl_entry("d1", "u2").await.unwrap().unwrap();
        assert_eq!(entry.level, GrantLevel::View);

        // Overwrite, then delete.
        directory
            .upsert_acl_entry(AclEntry::new("d1", "u2", GrantLevel::Edit))
            .await
            .unwrap();
        let entry = directory.acl_entry("d1", "u2").await.unwrap().unwrap();
        assert_eq!(entry.level, GrantLevel::Edit);

        directory.remove_acl_entry("d1", "u2").await.unwrap();
        assert!(directory.acl_entry("d1", "u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replace_keeps_a_single_active_share() {
        let directory = directory().await;
        let now = Utc::now();

        let first = LinkShare {
            id: "s1".to_string(),
            drawing_id: "d1".to_string(),
            permission: GrantLevel::View,
            created_at: now,
            expires_at: None,
            revoked_at: None,
        };
        directory
            .replace_active_link_share(first, now)
            .await
            .unwrap();

        let second = LinkShare {
            id: "s2".to_string(),
            drawing_id: "d1".to_string(),
            permission: GrantLevel::Edit,
            created_at: now + Duration::seconds(1),
            expires_at: Some(now + Duration::days(7)),
            revoked_at: None,
        };
        directory
            .replace_active_link_share(second, now + Duration::seconds(1))
            .await
            .unwrap();

        let history = directory.link_share_history("d1").await.unwrap();
        assert_eq!(history.len(), 2);
        let active: Vec<_> = history
            .iter()
            .filter(|share| share.revoked_at.is_none())
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "s2");
        assert_eq!(active[0].permission, GrantLevel::Edit);

        let current = directory
            .active_link_share("d1", now + Duration::seconds(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.id, "s2");
    }

    #[tokio::test]
    async fn expired_shares_are_not_active() {
        let directory = directory().await;
        let now = Utc::now();

        let share = LinkShare {
            id: "s1".to_string(),
            drawing_id: "d1".to_string(),
            permission: GrantLevel::View,
            created_at: now,
            expires_at: Some(now + Duration::seconds(60)),
            revoked_at: None,
        };
        directory.replace_active_link_share(share, now).await.unwrap();

        assert!(directory
            .active_link_share("d1", now + Duration::seconds(30))
            .await
            .unwrap()
            .is_some());
        assert!(directory
            .active_link_share("d1", now + Duration::seconds(61))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let directory = directory().await;
        let now = Utc::now();

        let share = LinkShare {
            id: "s1".to_string(),
            drawing_id: "d1".to_string(),
            permission: GrantLevel::View,
            created_at: now,
            expires_at: None,
            revoked_at: None,
        };
        directory.replace_active_link_share(share, now).await.unwrap();

        directory.revoke_link_share("d1", "s1", now).await.unwrap();
        directory.revoke_link_share("d1", "s1", now).await.unwrap();
        directory
            .revoke_link_share("d1", "missing", now)
            .await
            .unwrap();

        assert!(directory.active_link_share("d1", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shared_with_me_excludes_owned_drawings() {
        let directory = directory().await;
        directory
            .create_drawing(DrawingRecord::new("mine", "u2", "Mine"))
            .await
            .unwrap();
        directory
            .create_drawing(DrawingRecord::new("theirs", "u1", "Theirs"))
            .await
            .unwrap();
        directory
            .upsert_acl_entry(AclEntry::new("mine", "u2", GrantLevel::Edit))
            .await
            .unwrap();
        directory
            .upsert_acl_entry(AclEntry::new("theirs", "u2", GrantLevel::View))
            .await
            .unwrap();

        let shared = directory.shared_with_me("u2").await.unwrap();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].id, "theirs");
    }

    #[tokio::test]
    async fn resolver_runs_against_sqlite() {
        use inkboard_applications::AccessResolver;
        use std::sync::Arc;

        let directory = Arc::new(directory().await);
        directory
            .create_drawing(DrawingRecord::new("d1", "u1", "Board"))
            .await
            .unwrap();
        let resolver = AccessResolver::new(directory);

        let access = resolver
            .resolve(&Principal::User("u1".to_string()), "d1", Utc::now())
            .await
            .unwrap();
        assert!(access.is_owner());
    }
}
