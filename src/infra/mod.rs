//! Clients for the managed services this backend delegates to, and the
//! traits the rest of the crate sees them through.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::image::MediaAsset;

pub mod cloudinary;
pub mod db;
pub mod supabase;

/// Identity as asserted by the external provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalIdentity {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub identity: ExternalIdentity,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("invalid login credentials")]
    InvalidCredentials,
    #[error("{0}")]
    Rejected(String),
    #[error("identity provider unreachable: {0}")]
    Transport(String),
    #[error("identity provider returned {status}: {body}")]
    Unexpected { status: u16, body: String },
    #[error("malformed identity provider response: {0}")]
    Malformed(String),
    #[error("service role key not configured")]
    MissingServiceKey,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<ExternalIdentity, ProviderError>;

    /// Creates an already-confirmed account using the service role.
    async fn create_confirmed_user(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<ExternalIdentity, ProviderError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError>;

    /// [`ProviderError::InvalidToken`] when the provider rejects the token;
    /// transport failures are reported separately.
    async fn verify_token(&self, token: &str) -> Result<ExternalIdentity, ProviderError>;

    async fn sign_out(&self, token: &str) -> Result<(), ProviderError>;
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media service unreachable: {0}")]
    Transport(String),
    #[error("media service returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed media service response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// `data` is a base64 payload or a data URI.
    async fn upload(&self, data: &str, file_name: &str) -> Result<MediaAsset, MediaError>;

    /// Succeeds when the asset is already gone.
    async fn destroy(&self, public_id: &str) -> Result<(), MediaError>;
}
