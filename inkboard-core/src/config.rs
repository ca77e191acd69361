//! Configuration management

use crate::error::{ErrorContext, InkboardError, InkboardResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the Inkboard system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InkboardConfig {
    pub csrf: CsrfConfig,
    pub link_shares: LinkShareConfig,
    pub realtime: RealtimeConfig,
    pub storage: StorageConfig,
}

/// CSRF protection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfConfig {
    /// Token lifetime in hours
    pub token_ttl_hours: i64,
    /// Accepted clock skew for tokens claiming a future timestamp, in seconds
    pub future_skew_secs: i64,
    /// Per-IP issuance limit within a rolling one-minute window
    pub issue_rate_per_minute: u32,
    /// Front-end origins allowed to send mutation requests
    pub allowed_origins: Vec<String>,
    /// Allow localhost origins regardless of the allow-list
    pub dev_mode: bool,
}

/// Link-share TTL policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkShareConfig {
    /// Default lifetime for edit shares, in seconds
    pub edit_default_ttl_secs: i64,
    /// Lower clamp for explicitly requested expiries, in seconds
    pub min_ttl_secs: i64,
    /// Upper clamp for explicitly requested expiries, in seconds
    pub max_ttl_secs: i64,
}

/// Realtime collaboration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Per-connection access-cache TTL in milliseconds
    pub access_cache_ttl_ms: u64,
    /// Refuse anonymous socket connections
    pub require_auth: bool,
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database URL; `None` selects the in-memory directory
    pub database_url: Option<String>,
}

impl Default for InkboardConfig {
    fn default() -> Self {
        Self {
            csrf: CsrfConfig {
                token_ttl_hours: 24,
                future_skew_secs: 300,
                issue_rate_per_minute: 30,
                allowed_origins: Vec::new(),
                dev_mode: false,
            },
            link_shares: LinkShareConfig {
                edit_default_ttl_secs: 7 * 24 * 60 * 60,
                min_ttl_secs: 60,
                max_ttl_secs: 90 * 24 * 60 * 60,
            },
            realtime: RealtimeConfig {
                access_cache_ttl_ms: 1500,
                require_auth: false,
            },
            storage: StorageConfig { database_url: None },
        }
    }
}

impl InkboardConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> InkboardResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| InkboardError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("read_file"),
        })?;

        let config: InkboardConfig =
            toml::from_str(&content).map_err(|e| InkboardError::Config {
                message: format!("Failed to parse config: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("config").with_operation("parse_toml"),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants
    pub fn validate(&self) -> InkboardResult<()> {
        if self.csrf.token_ttl_hours <= 0 {
            return Err(InkboardError::Validation {
                message: "csrf.token_ttl_hours must be positive".to_string(),
                field: Some("csrf.token_ttl_hours".to_string()),
                context: ErrorContext::new("config"),
            });
        }
        if self.link_shares.min_ttl_secs <= 0
            || self.link_shares.max_ttl_secs < self.link_shares.min_ttl_secs
        {
            return Err(InkboardError::Validation {
                message: "link_shares TTL bounds must satisfy 0 < min <= max".to_string(),
                field: Some("link_shares".to_string()),
                context: ErrorContext::new("config"),
            });
        }
        if self.link_shares.edit_default_ttl_secs > self.link_shares.max_ttl_secs {
            return Err(InkboardError::Validation {
                message: "link_shares.edit_default_ttl_secs exceeds max_ttl_secs".to_string(),
                field: Some("link_shares.edit_default_ttl_secs".to_string()),
                context: ErrorContext::new("config"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(InkboardConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_ttl_bounds() {
        let mut config = InkboardConfig::default();
        config.link_shares.min_ttl_secs = 100;
        config.link_shares.max_ttl_secs = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_edit_default() {
        let mut config = InkboardConfig::default();
        config.link_shares.edit_default_ttl_secs = config.link_shares.max_ttl_secs + 1;
        assert!(config.validate().is_err());
    }
}
