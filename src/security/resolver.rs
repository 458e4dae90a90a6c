//! Request identity resolution.
//!
//! One routine turns `(token, request metadata)` into a [`RequestContext`]:
//! verify the token with the provider, find or provision the local user,
//! refresh or open a session, and bump `last_seen`. The three database steps
//! share one [`AccountTx`], so a failure in any of them commits nothing.

use std::sync::Arc;

use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, instrument};

use super::config::SecurityConfig;
use super::context::{Authenticated, RejectReason, RequestContext, RequestCredentials, RequestMeta};
use crate::domain::session::NewSession;
use crate::domain::user::{NewUser, Role, User, FALLBACK_NAME};
use crate::infra::{ExternalIdentity, IdentityProvider, ProviderError};
use crate::store::{AccountStore, AccountTx, StoreError};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("identity provider failure: {0}")]
    Provider(#[source] ProviderError),
    #[error("account store failure: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub ttl: Duration,
    pub auto_provision: bool,
}

impl From<&SecurityConfig> for SessionPolicy {
    fn from(cfg: &SecurityConfig) -> Self {
        Self {
            ttl: cfg.session_ttl,
            auto_provision: cfg.auto_provision_users,
        }
    }
}

#[derive(Clone)]
pub struct IdentityResolver {
    provider: Arc<dyn IdentityProvider>,
    accounts: Arc<dyn AccountStore>,
    policy: SessionPolicy,
}

impl IdentityResolver {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        accounts: Arc<dyn AccountStore>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            provider,
            accounts,
            policy,
        }
    }

    #[instrument(skip_all, fields(has_token = creds.bearer.is_some()))]
    pub async fn resolve(&self, creds: &RequestCredentials) -> Result<RequestContext, ResolveError> {
        let Some(token) = creds.bearer.as_deref() else {
            return Ok(RequestContext::Anonymous);
        };

        let identity = match self.provider.verify_token(token).await {
            Ok(identity) => identity,
            Err(ProviderError::InvalidToken) => {
                debug!("bearer token rejected by identity provider");
                return Ok(RequestContext::Rejected(RejectReason::InvalidToken));
            }
            Err(err) => return Err(ResolveError::Provider(err)),
        };

        let mut tx = self.accounts.begin().await?;
        let user = match tx.find_user(identity.id).await? {
            Some(user) => user,
            None if self.policy.auto_provision => provision(&mut tx, &identity).await?,
            None => {
                debug!(auth_id = %identity.id, "verified identity has no local user");
                return Ok(RequestContext::Rejected(RejectReason::UnknownUser));
            }
        };

        let auth = self.attach_session(tx, user, &creds.meta, token).await?;
        Ok(RequestContext::Authenticated(Box::new(auth)))
    }

    /// After a password sign-in: provisions the local user if needed and
    /// always opens a fresh session.
    #[instrument(skip_all, fields(auth_id = %identity.id))]
    pub async fn start_session(
        &self,
        identity: &ExternalIdentity,
        meta: &RequestMeta,
        token: &str,
    ) -> Result<Authenticated, ResolveError> {
        let meta = RequestMeta {
            prior_session: None,
            ..meta.clone()
        };
        let mut tx = self.accounts.begin().await?;
        let user = match tx.find_user(identity.id).await? {
            Some(user) => user,
            None => provision(&mut tx, identity).await?,
        };
        self.attach_session(tx, user, &meta, token).await
    }

    async fn attach_session(
        &self,
        mut tx: Box<dyn AccountTx>,
        user: User,
        meta: &RequestMeta,
        token: &str,
    ) -> Result<Authenticated, ResolveError> {
        let now = OffsetDateTime::now_utc();

        let refreshed = match meta.prior_session {
            Some(id) => tx.touch_session(id, user.auth_id, now).await?,
            None => None,
        };
        let (session, session_created) = match refreshed {
            Some(session) => (session, false),
            None => {
                let fresh = NewSession::starting_at(
                    user.auth_id,
                    meta.user_agent.clone(),
                    meta.ip_address.clone(),
                    now,
                    self.policy.ttl,
                );
                (tx.insert_session(&fresh).await?, true)
            }
        };

        tx.touch_user(user.auth_id, now).await?;
        tx.commit().await?;

        debug!(session_id = %session.id, session_created, "request identity resolved");
        Ok(Authenticated {
            user: User {
                last_seen: Some(now),
                ..user
            },
            session,
            token: token.to_string(),
            session_created,
        })
    }
}

async fn provision(tx: &mut Box<dyn AccountTx>, identity: &ExternalIdentity) -> Result<User, StoreError> {
    let user = tx
        .insert_user(&NewUser {
            auth_id: identity.id,
            name: identity
                .display_name
                .clone()
                .unwrap_or_else(|| FALLBACK_NAME.to_string()),
            email: identity.email.clone(),
            role: Role::default(),
        })
        .await?;
    info!(auth_id = %user.auth_id, "provisioned local user");
    Ok(user)
}
