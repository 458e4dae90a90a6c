//! In-process backend for local development (`STORAGE_BACKEND=memory`) and
//! tests. Each transaction holds the accounts lock for its whole lifetime and
//! works on a copy, so uncommitted work is discarded on drop.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{AccountStore, AccountTx, CatalogStore, StoreError};
use crate::domain::image::{sort_for_display, ImageReplacement, NewImage, ProductImage};
use crate::domain::product::{
    Product, ProductDetail, ProductFilter, ProductInput, ProductPatch, ProductSummary,
};
use crate::domain::session::{NewSession, Session};
use crate::domain::user::{NewUser, ProfilePatch, User};

#[derive(Debug, Clone, Default)]
struct Accounts {
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, Session>,
}

#[derive(Debug, Default)]
struct Catalog {
    products: BTreeMap<i64, Product>,
    images: BTreeMap<i64, ProductImage>,
    last_product_id: i64,
    last_image_id: i64,
}

impl Catalog {
    fn images_of(&self, product_id: i64) -> Vec<ProductImage> {
        let mut images: Vec<ProductImage> = self
            .images
            .values()
            .filter(|i| i.product_id == product_id)
            .cloned()
            .collect();
        sort_for_display(&mut images);
        images
    }

    fn clear_mains(&mut self, product_id: i64, keep: Option<i64>) {
        for image in self.images.values_mut() {
            if image.product_id == product_id && Some(image.id) != keep {
                image.is_main = false;
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    accounts: Arc<Mutex<Accounts>>,
    catalog: Arc<Mutex<Catalog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct MemoryAccountTx {
    guard: OwnedMutexGuard<Accounts>,
    work: Accounts,
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn AccountTx>, StoreError> {
        let guard = self.accounts.clone().lock_owned().await;
        // Copy-on-begin is proportional to the live account set; expired
        // sessions are swept on insert so it stays bounded.
        let work = guard.clone();
        Ok(Box::new(MemoryAccountTx { guard, work }))
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let mut accounts = self.accounts.lock().await;
        insert_user(&mut accounts, user)
    }

    async fn update_profile(
        &self,
        auth_id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<Option<User>, StoreError> {
        let mut accounts = self.accounts.lock().await;
        let Some(user) = accounts.users.get_mut(&auth_id) else {
            return Ok(None);
        };
        if let Some(name) = &patch.name {
            user.name = name.clone();
        }
        if let Some(role) = patch.role {
            user.role = role;
        }
        Ok(Some(user.clone()))
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.accounts.lock().await.sessions.remove(&id).is_some())
    }
}

fn insert_user(accounts: &mut Accounts, user: &NewUser) -> Result<User, StoreError> {
    if accounts.users.contains_key(&user.auth_id) {
        return Err(StoreError::Conflict(format!(
            "user {} already exists",
            user.auth_id
        )));
    }
    let row = User {
        auth_id: user.auth_id,
        name: user.name.clone(),
        email: user.email.clone(),
        role: user.role,
        last_seen: None,
        created_at: OffsetDateTime::now_utc(),
    };
    accounts.users.insert(row.auth_id, row.clone());
    Ok(row)
}

#[async_trait]
impl AccountTx for MemoryAccountTx {
    async fn find_user(&mut self, auth_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.work.users.get(&auth_id).cloned())
    }

    async fn insert_user(&mut self, user: &NewUser) -> Result<User, StoreError> {
        insert_user(&mut self.work, user)
    }

    async fn touch_user(&mut self, auth_id: Uuid, at: OffsetDateTime) -> Result<(), StoreError> {
        if let Some(user) = self.work.users.get_mut(&auth_id) {
            user.last_seen = Some(at);
        }
        Ok(())
    }

    async fn touch_session(
        &mut self,
        id: Uuid,
        user_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<Session>, StoreError> {
        match self.work.sessions.get_mut(&id) {
            Some(session) if session.user_id == user_id && session.is_live_at(at) => {
                session.last_active = at;
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn insert_session(&mut self, session: &NewSession) -> Result<Session, StoreError> {
        if !self.work.users.contains_key(&session.user_id) {
            return Err(StoreError::Conflict(format!(
                "session owner {} does not exist",
                session.user_id
            )));
        }
        self.work
            .sessions
            .retain(|_, s| s.user_id != session.user_id || s.is_live_at(session.created_at));
        let row = Session {
            id: session.id,
            user_id: session.user_id,
            user_agent: session.user_agent.clone(),
            ip_address: session.ip_address.clone(),
            expires_at: session.expires_at,
            last_active: session.created_at,
            created_at: session.created_at,
        };
        self.work.sessions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryAccountTx { mut guard, work } = *self;
        *guard = work;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<ProductSummary>, StoreError> {
        let catalog = self.catalog.lock().await;
        let take = usize::try_from(filter.fetch_size()).unwrap_or(usize::MAX);
        Ok(catalog
            .products
            .values()
            .rev()
            .filter(|p| filter.matches(p))
            .take(take)
            .map(|p| ProductSummary {
                product: p.clone(),
                main_image: catalog.images_of(p.id).into_iter().find(|i| i.is_main),
            })
            .collect())
    }

    async fn categories(&self) -> Result<Vec<String>, StoreError> {
        let catalog = self.catalog.lock().await;
        let mut categories: Vec<String> = catalog
            .products
            .values()
            .filter_map(|p| p.category.clone())
            .collect();
        categories.sort();
        categories.dedup();
        Ok(categories)
    }

    async fn get_product(&self, id: i64) -> Result<Option<ProductDetail>, StoreError> {
        let catalog = self.catalog.lock().await;
        Ok(catalog.products.get(&id).map(|p| ProductDetail {
            product: p.clone(),
            images: catalog.images_of(id),
        }))
    }

    async fn product_exists(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.catalog.lock().await.products.contains_key(&id))
    }

    async fn create_product(&self, input: &ProductInput) -> Result<Product, StoreError> {
        let mut catalog = self.catalog.lock().await;
        catalog.last_product_id += 1;
        let now = OffsetDateTime::now_utc();
        let product = Product {
            id: catalog.last_product_id,
            name: input.name.clone(),
            category: input.category.clone(),
            composition: input.composition.clone(),
            description: input.description.clone(),
            price: input.price,
            created_at: now,
            updated_at: now,
        };
        catalog.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn update_product(
        &self,
        id: i64,
        patch: &ProductPatch,
    ) -> Result<Option<Product>, StoreError> {
        let mut catalog = self.catalog.lock().await;
        let Some(product) = catalog.products.get_mut(&id) else {
            return Ok(None);
        };
        patch.apply(product);
        product.updated_at = OffsetDateTime::now_utc();
        Ok(Some(product.clone()))
    }

    async fn delete_product(&self, id: i64) -> Result<bool, StoreError> {
        let mut catalog = self.catalog.lock().await;
        if catalog.products.remove(&id).is_none() {
            return Ok(false);
        }
        catalog.images.retain(|_, image| image.product_id != id);
        Ok(true)
    }

    async fn product_images(&self, product_id: i64) -> Result<Vec<ProductImage>, StoreError> {
        Ok(self.catalog.lock().await.images_of(product_id))
    }

    async fn find_image(&self, id: i64) -> Result<Option<ProductImage>, StoreError> {
        Ok(self.catalog.lock().await.images.get(&id).cloned())
    }

    async fn insert_image(&self, image: &NewImage) -> Result<ProductImage, StoreError> {
        let mut catalog = self.catalog.lock().await;
        if !catalog.products.contains_key(&image.product_id) {
            return Err(StoreError::Conflict(format!(
                "product {} does not exist",
                image.product_id
            )));
        }
        if image.is_main {
            catalog.clear_mains(image.product_id, None);
        }
        catalog.last_image_id += 1;
        let row = ProductImage {
            id: catalog.last_image_id,
            product_id: image.product_id,
            url: image.asset.url.clone(),
            public_id: image.asset.public_id.clone(),
            file_name: image.file_name.clone(),
            is_main: image.is_main,
            uploaded_at: OffsetDateTime::now_utc(),
        };
        catalog.images.insert(row.id, row.clone());
        Ok(row)
    }

    async fn replace_image(
        &self,
        id: i64,
        replacement: &ImageReplacement,
    ) -> Result<Option<ProductImage>, StoreError> {
        let mut catalog = self.catalog.lock().await;
        let Some(product_id) = catalog.images.get(&id).map(|i| i.product_id) else {
            return Ok(None);
        };
        if replacement.is_main == Some(true) {
            catalog.clear_mains(product_id, Some(id));
        }
        let Some(image) = catalog.images.get_mut(&id) else {
            return Ok(None);
        };
        image.url = replacement.asset.url.clone();
        image.public_id = replacement.asset.public_id.clone();
        image.file_name = replacement.file_name.clone();
        if let Some(is_main) = replacement.is_main {
            image.is_main = is_main;
        }
        Ok(Some(image.clone()))
    }

    async fn set_main_image(&self, id: i64) -> Result<Option<ProductImage>, StoreError> {
        let mut catalog = self.catalog.lock().await;
        let Some(product_id) = catalog.images.get(&id).map(|i| i.product_id) else {
            return Ok(None);
        };
        catalog.clear_mains(product_id, Some(id));
        let Some(image) = catalog.images.get_mut(&id) else {
            return Ok(None);
        };
        image.is_main = true;
        Ok(Some(image.clone()))
    }

    async fn delete_image(&self, id: i64) -> Result<bool, StoreError> {
        Ok(self.catalog.lock().await.images.remove(&id).is_some())
    }
}

#[cfg(test)]
impl MemoryStore {
    pub async fn session(&self, id: Uuid) -> Option<Session> {
        self.accounts.lock().await.sessions.get(&id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.accounts.lock().await.sessions.len()
    }

    pub async fn user(&self, auth_id: Uuid) -> Option<User> {
        self.accounts.lock().await.users.get(&auth_id).cloned()
    }

    pub async fn seed_session(&self, session: Session) {
        self.accounts
            .lock()
            .await
            .sessions
            .insert(session.id, session);
    }

    /// Inserts a raw image row, bypassing the single-main rule.
    pub async fn seed_image(&self, product_id: i64, is_main: bool) -> ProductImage {
        let mut catalog = self.catalog.lock().await;
        catalog.last_image_id += 1;
        let id = catalog.last_image_id;
        let row = ProductImage {
            id,
            product_id,
            url: format!("https://res.cloudinary.test/products/{id}.png"),
            public_id: format!("products/{id}"),
            file_name: format!("{id}.png"),
            is_main,
            uploaded_at: OffsetDateTime::now_utc(),
        };
        catalog.images.insert(id, row.clone());
        row
    }
}
