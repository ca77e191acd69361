//! Inkboard Applications - Authorization domain logic
//!
//! This crate holds the pure authorization core: the access resolver that
//! decides what a principal may do with a drawing, the link-share policy
//! governing "anyone with the link" access, and the directory trait through
//! which the persistent store is consumed.

pub mod auth;
pub mod store;

pub use auth::{AccessResolver, AclEntry, LinkShare, LinkSharePolicy, LinkSharePolicyStore};
pub use store::{DrawingDirectory, DrawingRecord, InMemoryDirectory};
