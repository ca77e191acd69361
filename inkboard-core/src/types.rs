//! Core authorization types
//!
//! Defines the access-level lattice and the principal model shared by every
//! layer of the system.

use serde::{Deserialize, Serialize};

/// The identity making a request.
///
/// Authorization is a pure function of principal + drawing id + time; no
/// session object is carried alongside.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    /// No authenticated identity.
    Anonymous,
    /// An authenticated account, identified by its stable account id.
    User(String),
}

impl Principal {
    /// Get the account id if this principal is authenticated.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Principal::User(id) => Some(id.as_str()),
            Principal::Anonymous => None,
        }
    }

    /// Check whether this principal is an authenticated account.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::User(_))
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Principal::Anonymous => write!(f, "anonymous"),
            Principal::User(id) => write!(f, "user:{}", id),
        }
    }
}

/// Effective access level for a (principal, drawing) pair.
///
/// The variants form a total order `None < View < Edit < Owner`; combining
/// two levels is `Ord::max`. `Owner` implies `Edit` and `View`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum DrawingAccess {
    #[default]
    None,
    View,
    Edit,
    Owner,
}

impl DrawingAccess {
    /// Whether the drawing contents may be read at all.
    pub fn can_view(self) -> bool {
        self != DrawingAccess::None
    }

    /// Whether drawing elements may be mutated.
    pub fn can_edit(self) -> bool {
        matches!(self, DrawingAccess::Edit | DrawingAccess::Owner)
    }

    /// Whether this is the drawing's owner.
    pub fn is_owner(self) -> bool {
        self == DrawingAccess::Owner
    }

    /// Combine two access levels, keeping the higher-ranked one.
    pub fn combine(self, other: DrawingAccess) -> DrawingAccess {
        self.max(other)
    }
}

impl std::fmt::Display for DrawingAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrawingAccess::None => write!(f, "none"),
            DrawingAccess::View => write!(f, "view"),
            DrawingAccess::Edit => write!(f, "edit"),
            DrawingAccess::Owner => write!(f, "owner"),
        }
    }
}

/// Grant level carried by ACL entries and link shares.
///
/// Deliberately narrower than [`DrawingAccess`]: ownership is never granted,
/// it is a property of the drawing row itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantLevel {
    View,
    Edit,
}

impl GrantLevel {
    /// The access level this grant confers.
    pub fn access(self) -> DrawingAccess {
        match self {
            GrantLevel::View => DrawingAccess::View,
            GrantLevel::Edit => DrawingAccess::Edit,
        }
    }
}

impl std::fmt::Display for GrantLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrantLevel::View => write!(f, "view"),
            GrantLevel::Edit => write!(f, "edit"),
        }
    }
}

impl std::str::FromStr for GrantLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "view" => Ok(GrantLevel::View),
            "edit" => Ok(GrantLevel::Edit),
            _ => Err(format!("Unknown grant level: {}", s)),
        }
    }
}
