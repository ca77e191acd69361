//! Inkboard Core - Core data structures and trait definitions
//!
//! This module defines the shared abstractions for the entire Inkboard system:
//! access levels, principals, the unified error type, configuration and logging.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio;
pub use tracing;
