//! In-process stand-ins for the identity provider and media service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use uuid::Uuid;

use crate::domain::image::MediaAsset;
use crate::infra::{
    ExternalIdentity, IdentityProvider, MediaError, MediaStore, ProviderError, ProviderSession,
};
use crate::routes;
use crate::security::config::SecurityConfig;
use crate::state::AppState;
use crate::store::MemoryStore;

#[derive(Default)]
pub struct FakeIdentity {
    tokens: Mutex<HashMap<String, ExternalIdentity>>,
    accounts: Mutex<HashMap<String, (String, ExternalIdentity)>>,
    unreachable: AtomicBool,
    signed_out: Mutex<Vec<String>>,
}

impl FakeIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `token` verify as a fresh identity.
    pub fn issue_token(&self, token: &str, email: &str, name: Option<&str>) -> ExternalIdentity {
        let identity = ExternalIdentity {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: name.map(Into::into),
        };
        self.tokens
            .lock()
            .unwrap()
            .insert(token.to_string(), identity.clone());
        identity
    }

    pub fn add_account(&self, email: &str, password: &str, name: &str) -> ExternalIdentity {
        let identity = ExternalIdentity {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: Some(name.to_string()),
        };
        self.accounts
            .lock()
            .unwrap()
            .insert(email.to_string(), (password.to_string(), identity.clone()));
        identity
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn signed_out(&self) -> Vec<String> {
        self.signed_out.lock().unwrap().clone()
    }

    fn reachable(&self) -> Result<(), ProviderError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(ProviderError::Transport("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<ExternalIdentity, ProviderError> {
        self.reachable()?;
        if self.accounts.lock().unwrap().contains_key(email) {
            return Err(ProviderError::Rejected("User already registered".into()));
        }
        Ok(self.add_account(email, password, name))
    }

    async fn create_confirmed_user(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<ExternalIdentity, ProviderError> {
        self.sign_up(email, password, name).await
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError> {
        self.reachable()?;
        let identity = match self.accounts.lock().unwrap().get(email) {
            Some((stored, identity)) if stored == password => identity.clone(),
            _ => return Err(ProviderError::InvalidCredentials),
        };
        let access_token = format!("access-{}", Uuid::new_v4());
        self.tokens
            .lock()
            .unwrap()
            .insert(access_token.clone(), identity.clone());
        Ok(ProviderSession {
            access_token,
            refresh_token: Some("refresh".into()),
            expires_in: Some(3600),
            identity,
        })
    }

    async fn verify_token(&self, token: &str) -> Result<ExternalIdentity, ProviderError> {
        self.reachable()?;
        self.tokens
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or(ProviderError::InvalidToken)
    }

    async fn sign_out(&self, token: &str) -> Result<(), ProviderError> {
        self.reachable()?;
        self.signed_out.lock().unwrap().push(token.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMedia {
    next: AtomicU64,
    uploads: Mutex<Vec<String>>,
    destroyed: Mutex<Vec<String>>,
}

impl FakeMedia {
    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaStore for FakeMedia {
    async fn upload(&self, data: &str, _file_name: &str) -> Result<MediaAsset, MediaError> {
        if data == "reject" {
            return Err(MediaError::Rejected {
                status: 400,
                body: "Invalid image file".into(),
            });
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        let public_id = format!("products/test-{n}");
        self.uploads.lock().unwrap().push(public_id.clone());
        Ok(MediaAsset {
            url: format!("https://media.test/{public_id}.png"),
            public_id,
        })
    }

    async fn destroy(&self, public_id: &str) -> Result<(), MediaError> {
        self.destroyed.lock().unwrap().push(public_id.to_string());
        Ok(())
    }
}

pub struct TestApp {
    pub app: Router,
    pub store: MemoryStore,
    pub identity: Arc<FakeIdentity>,
    pub media: Arc<FakeMedia>,
}

pub fn test_app() -> TestApp {
    test_app_with(SecurityConfig::default())
}

pub fn test_app_with(security: SecurityConfig) -> TestApp {
    let store = MemoryStore::new();
    let identity = Arc::new(FakeIdentity::new());
    let media = Arc::new(FakeMedia::default());
    let state = AppState::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        identity.clone(),
        media.clone(),
        security,
    );
    TestApp {
        app: routes::router(state, 1024 * 1024),
        store,
        identity,
        media,
    }
}
