//! Application state wiring the authorization core to the web surface

use crate::{
    csrf::CsrfTokenService,
    security::{RateLimitConfig, SecurityState},
    websocket::RoomRegistry,
    WebConfig, WebResult,
};
use inkboard_applications::{
    AccessResolver, DrawingDirectory, InMemoryDirectory, LinkSharePolicy, LinkSharePolicyStore,
};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "sqlite")]
use crate::database::SqliteDirectory;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration
    pub config: Arc<WebConfig>,
    /// Persistent-store interface
    pub directory: Arc<dyn DrawingDirectory>,
    /// Effective-access decisions
    pub access: Arc<AccessResolver>,
    /// Link-share policy management
    pub link_shares: Arc<LinkSharePolicyStore>,
    /// Stateless CSRF tokens
    pub csrf: Arc<CsrfTokenService>,
    /// Rate limiting for token issuance
    pub security: SecurityState,
    /// Live collaboration rooms
    pub rooms: RoomRegistry,
}

impl AppState {
    /// Create a new application state
    pub async fn new(config: WebConfig) -> WebResult<Self> {
        config.inkboard.validate()?;

        let directory = Self::build_directory(&config).await?;

        let access = Arc::new(AccessResolver::new(directory.clone()));
        let link_shares = Arc::new(LinkSharePolicyStore::new(
            directory.clone(),
            LinkSharePolicy::from_config(&config.inkboard.link_shares),
        ));
        let csrf = Arc::new(CsrfTokenService::new(&config.inkboard.csrf));
        let security = SecurityState::new(RateLimitConfig {
            requests_per_minute: config.inkboard.csrf.issue_rate_per_minute,
            cleanup_interval: Duration::from_secs(60),
        });

        Ok(Self {
            config: Arc::new(config),
            directory,
            access,
            link_shares,
            csrf,
            security,
            rooms: RoomRegistry::new(),
        })
    }

    #[cfg(feature = "sqlite")]
    async fn build_directory(config: &WebConfig) -> WebResult<Arc<dyn DrawingDirectory>> {
        match &config.inkboard.storage.database_url {
            Some(database_url) => {
                let directory = SqliteDirectory::new(database_url).await?;
                tracing::info!("Using SQLite drawing directory at {}", database_url);
                Ok(Arc::new(directory))
            }
            None => {
                tracing::info!("No database configured; using in-memory drawing directory");
                Ok(Arc::new(InMemoryDirectory::new()))
            }
        }
    }

    #[cfg(not(feature = "sqlite"))]
    async fn build_directory(config: &WebConfig) -> WebResult<Arc<dyn DrawingDirectory>> {
        if config.inkboard.storage.database_url.is_some() {
            tracing::warn!("Built without the sqlite feature; falling back to memory");
        }
        Ok(Arc::new(InMemoryDirectory::new()))
    }
}
