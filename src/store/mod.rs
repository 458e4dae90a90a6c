//! Persistence seams.
//!
//! [`AccountStore`] owns users and sessions; multi-step identity resolution
//! runs inside an [`AccountTx`] so that a failure part-way leaves nothing
//! behind. [`CatalogStore`] owns products and their images; operations that
//! touch more than one row are atomic inside each implementation.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::image::{ImageReplacement, NewImage, ProductImage};
use crate::domain::product::{
    Product, ProductDetail, ProductFilter, ProductInput, ProductPatch, ProductSummary,
};
use crate::domain::session::{NewSession, Session};
use crate::domain::user::{NewUser, ProfilePatch, User};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn AccountTx>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the external id is already mirrored.
    async fn create_user(&self, user: &NewUser) -> Result<User, StoreError>;

    async fn update_profile(
        &self,
        auth_id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<Option<User>, StoreError>;

    /// Returns whether a row was removed.
    async fn delete_session(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Unit of work over users and sessions. Dropping without [`AccountTx::commit`]
/// discards every change.
#[async_trait]
pub trait AccountTx: Send {
    async fn find_user(&mut self, auth_id: Uuid) -> Result<Option<User>, StoreError>;

    async fn insert_user(&mut self, user: &NewUser) -> Result<User, StoreError>;

    async fn touch_user(&mut self, auth_id: Uuid, at: OffsetDateTime) -> Result<(), StoreError>;

    /// Bumps `last_active` on a session owned by `user_id` that has not
    /// expired at `at`. `None` when no such session exists.
    async fn touch_session(
        &mut self,
        id: Uuid,
        user_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<Session>, StoreError>;

    /// Also drops the owner's expired sessions.
    async fn insert_session(&mut self, session: &NewSession) -> Result<Session, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Up to `filter.fetch_size()` rows, id descending, cursor row included.
    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<ProductSummary>, StoreError>;

    async fn categories(&self) -> Result<Vec<String>, StoreError>;

    async fn get_product(&self, id: i64) -> Result<Option<ProductDetail>, StoreError>;

    async fn product_exists(&self, id: i64) -> Result<bool, StoreError>;

    async fn create_product(&self, input: &ProductInput) -> Result<Product, StoreError>;

    async fn update_product(
        &self,
        id: i64,
        patch: &ProductPatch,
    ) -> Result<Option<Product>, StoreError>;

    /// Deletes the product and, by cascade, its image rows.
    async fn delete_product(&self, id: i64) -> Result<bool, StoreError>;

    async fn product_images(&self, product_id: i64) -> Result<Vec<ProductImage>, StoreError>;

    async fn find_image(&self, id: i64) -> Result<Option<ProductImage>, StoreError>;

    /// Inserts the row; when `is_main` is set, every other image of the
    /// product loses its main flag in the same unit of work.
    async fn insert_image(&self, image: &NewImage) -> Result<ProductImage, StoreError>;

    async fn replace_image(
        &self,
        id: i64,
        replacement: &ImageReplacement,
    ) -> Result<Option<ProductImage>, StoreError>;

    /// Leaves exactly this image flagged main among its product's images.
    async fn set_main_image(&self, id: i64) -> Result<Option<ProductImage>, StoreError>;

    async fn delete_image(&self, id: i64) -> Result<bool, StoreError>;
}
