use std::sync::Arc;
use std::time::Duration;

use crate::infra::{IdentityProvider, MediaStore};
use crate::security::config::SecurityConfig;
use crate::security::rate_limit::RateLimiter;
use crate::security::resolver::{IdentityResolver, SessionPolicy};
use crate::store::{AccountStore, CatalogStore};

pub struct AppState {
    pub accounts: Arc<dyn AccountStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub media: Arc<dyn MediaStore>,
    pub resolver: IdentityResolver,
    pub security: SecurityConfig,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        catalog: Arc<dyn CatalogStore>,
        identity: Arc<dyn IdentityProvider>,
        media: Arc<dyn MediaStore>,
        security: SecurityConfig,
    ) -> Arc<Self> {
        let resolver = IdentityResolver::new(
            identity.clone(),
            accounts.clone(),
            SessionPolicy::from(&security),
        );
        let limiter = RateLimiter::new(
            security.auth_rate_limit,
            Duration::from_secs(security.auth_rate_window_secs),
        );
        Arc::new(Self {
            accounts,
            catalog,
            identity,
            media,
            resolver,
            security,
            limiter,
        })
    }
}
