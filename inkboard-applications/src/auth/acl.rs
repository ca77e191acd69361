//! Per-drawing, per-user access-control entries

use chrono::{DateTime, Utc};
use inkboard_core::GrantLevel;
use serde::{Deserialize, Serialize};

/// A single access-control entry.
///
/// Uniquely keyed by (drawing_id, user_id). Entries are created or
/// overwritten only by the drawing's owner and deleted individually.
/// A self-referential entry granting the owner access to their own drawing
/// is legal data but never influences resolution or listings: ownership
/// always takes precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclEntry {
    pub drawing_id: String,
    pub user_id: String,
    pub level: GrantLevel,
    pub created_at: DateTime<Utc>,
}

impl AclEntry {
    pub fn new(drawing_id: &str, user_id: &str, level: GrantLevel) -> Self {
        Self {
            drawing_id: drawing_id.to_string(),
            user_id: user_id.to_string(),
            level,
            created_at: Utc::now(),
        }
    }
}
