use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{AccountStore, AccountTx, CatalogStore, StoreError};
use crate::domain::image::{ImageReplacement, NewImage, ProductImage};
use crate::domain::product::{
    Product, ProductDetail, ProductFilter, ProductInput, ProductPatch, ProductSummary,
};
use crate::domain::session::{NewSession, Session};
use crate::domain::user::{NewUser, ProfilePatch, Role, User};
use crate::infra::db::Db;

const USER_COLUMNS: &str = "auth_id, name, email, role, last_seen, created_at";
const SESSION_COLUMNS: &str =
    "id, user_id, user_agent, ip_address, expires_at, last_active, created_at";
const PRODUCT_COLUMNS: &str =
    "id, name, category, composition, description, price, created_at, updated_at";
const IMAGE_COLUMNS: &str = "id, product_id, url, public_id, file_name, is_main, uploaded_at";

#[derive(Clone)]
pub struct PgStore {
    pool: Db,
}

impl PgStore {
    pub fn new(pool: Db) -> Self {
        Self { pool }
    }
}

pub struct PgAccountTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AccountStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn AccountTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgAccountTx { tx }))
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_user(&mut conn, user).await
    }

    async fn update_profile(
        &self,
        auth_id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE users SET name = COALESCE($2, name), role = COALESCE($3, role)
             WHERE auth_id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(auth_id)
        .bind(patch.name.as_deref())
        .bind(patch.role.map(|r| r.as_str()))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

#[async_trait]
impl AccountTx for PgAccountTx {
    async fn find_user(&mut self, auth_id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE auth_id = $1 FOR UPDATE"
        ))
        .bind(auth_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert_user(&mut self, user: &NewUser) -> Result<User, StoreError> {
        insert_user(&mut self.tx, user).await
    }

    async fn touch_user(&mut self, auth_id: Uuid, at: OffsetDateTime) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_seen = $2 WHERE auth_id = $1")
            .bind(auth_id)
            .bind(at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn touch_session(
        &mut self,
        id: Uuid,
        user_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE sessions SET last_active = $3
             WHERE id = $1 AND user_id = $2 AND expires_at > $3
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(id)
        .bind(user_id)
        .bind(at)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn insert_session(&mut self, session: &NewSession) -> Result<Session, StoreError> {
        sqlx::query("DELETE FROM sessions WHERE user_id = $1 AND expires_at <= $2")
            .bind(session.user_id)
            .bind(session.created_at)
            .execute(&mut *self.tx)
            .await?;
        let row = sqlx::query(&format!(
            "INSERT INTO sessions (id, user_id, user_agent, ip_address, expires_at, last_active, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)
             RETURNING {SESSION_COLUMNS}"
        ))
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.user_agent.as_deref())
        .bind(&session.ip_address)
        .bind(session.expires_at)
        .bind(session.created_at)
        .fetch_one(&mut *self.tx)
        .await?;
        session_from_row(&row)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

async fn insert_user(conn: &mut sqlx::PgConnection, user: &NewUser) -> Result<User, StoreError> {
    let res = sqlx::query(&format!(
        "INSERT INTO users (auth_id, name, email, role, created_at)
         VALUES ($1, $2, $3, $4, now())
         RETURNING {USER_COLUMNS}"
    ))
    .bind(user.auth_id)
    .bind(&user.name)
    .bind(&user.email)
    .bind(user.role.as_str())
    .fetch_one(conn)
    .await;

    match res {
        Ok(row) => user_from_row(&row),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
            StoreError::Conflict(format!("user {} already exists", user.auth_id)),
        ),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn list_products(&self, filter: &ProductFilter) -> Result<Vec<ProductSummary>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT p.id, p.name, p.category, p.composition, p.description, p.price,
                    p.created_at, p.updated_at,
                    i.id AS image_id, i.url AS image_url, i.public_id AS image_public_id,
                    i.file_name AS image_file_name, i.uploaded_at AS image_uploaded_at
             FROM products p
             LEFT JOIN LATERAL (
                 SELECT id, url, public_id, file_name, uploaded_at FROM product_images
                 WHERE product_id = p.id AND is_main
                 ORDER BY uploaded_at DESC LIMIT 1
             ) i ON true
             WHERE true",
        );
        if let Some(cursor) = filter.cursor {
            qb.push(" AND p.id <= ").push_bind(cursor);
        }
        if let Some(category) = &filter.category {
            qb.push(" AND p.category = ").push_bind(category.clone());
        }
        if let Some(search) = &filter.search {
            let pattern = like_pattern(search);
            qb.push(" AND (p.name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR p.description ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        qb.push(" ORDER BY p.id DESC LIMIT ").push_bind(filter.fetch_size());

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<ProductSummary, StoreError> {
                let product = product_from_row(row)?;
                let main_image = match row.try_get::<Option<i64>, _>("image_id")? {
                    Some(image_id) => Some(ProductImage {
                        id: image_id,
                        product_id: product.id,
                        url: row.try_get("image_url")?,
                        public_id: row.try_get("image_public_id")?,
                        file_name: row.try_get("image_file_name")?,
                        is_main: true,
                        uploaded_at: row.try_get("image_uploaded_at")?,
                    }),
                    None => None,
                };
                Ok(ProductSummary {
                    product,
                    main_image,
                })
            })
            .collect()
    }

    async fn categories(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT category FROM products WHERE category IS NOT NULL ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| r.try_get("category").map_err(StoreError::from))
            .collect()
    }

    async fn get_product(&self, id: i64) -> Result<Option<ProductDetail>, StoreError> {
        let row = sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let product = product_from_row(&row)?;
        let images = self.product_images(id).await?;
        Ok(Some(ProductDetail { product, images }))
    }

    async fn product_exists(&self, id: i64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM products WHERE id = $1) AS found")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("found")?)
    }

    async fn create_product(&self, input: &ProductInput) -> Result<Product, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO products (name, category, composition, description, price, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, now(), now())
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(&input.name)
        .bind(input.category.as_deref())
        .bind(input.composition.as_deref())
        .bind(input.description.as_deref())
        .bind(input.price)
        .fetch_one(&self.pool)
        .await?;
        product_from_row(&row)
    }

    async fn update_product(
        &self,
        id: i64,
        patch: &ProductPatch,
    ) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE products SET
                name = COALESCE($2, name),
                category = CASE WHEN $3 THEN $4 ELSE category END,
                composition = CASE WHEN $5 THEN $6 ELSE composition END,
                description = CASE WHEN $7 THEN $8 ELSE description END,
                price = COALESCE($9, price),
                updated_at = now()
             WHERE id = $1
             RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id)
        .bind(patch.name.as_deref())
        .bind(patch.category.is_some())
        .bind(patch.category.clone().flatten())
        .bind(patch.composition.is_some())
        .bind(patch.composition.clone().flatten())
        .bind(patch.description.is_some())
        .bind(patch.description.clone().flatten())
        .bind(patch.price)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn delete_product(&self, id: i64) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn product_images(&self, product_id: i64) -> Result<Vec<ProductImage>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {IMAGE_COLUMNS} FROM product_images WHERE product_id = $1
             ORDER BY is_main DESC, uploaded_at DESC, id DESC"
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(image_from_row).collect()
    }

    async fn find_image(&self, id: i64) -> Result<Option<ProductImage>, StoreError> {
        let row = sqlx::query(&format!("SELECT {IMAGE_COLUMNS} FROM product_images WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(image_from_row).transpose()
    }

    async fn insert_image(&self, image: &NewImage) -> Result<ProductImage, StoreError> {
        let mut tx = self.pool.begin().await?;
        if !lock_product(&mut tx, image.product_id).await? {
            return Err(StoreError::Conflict(format!(
                "product {} no longer exists",
                image.product_id
            )));
        }
        if image.is_main {
            sqlx::query("UPDATE product_images SET is_main = false WHERE product_id = $1 AND is_main")
                .bind(image.product_id)
                .execute(&mut *tx)
                .await?;
        }
        let row = sqlx::query(&format!(
            "INSERT INTO product_images (product_id, url, public_id, file_name, is_main, uploaded_at)
             VALUES ($1, $2, $3, $4, $5, now())
             RETURNING {IMAGE_COLUMNS}"
        ))
        .bind(image.product_id)
        .bind(&image.asset.url)
        .bind(&image.asset.public_id)
        .bind(&image.file_name)
        .bind(image.is_main)
        .fetch_one(&mut *tx)
        .await?;
        let inserted = image_from_row(&row)?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn replace_image(
        &self,
        id: i64,
        replacement: &ImageReplacement,
    ) -> Result<Option<ProductImage>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(product_id) = lock_image_product(&mut tx, id).await? else {
            return Ok(None);
        };
        if replacement.is_main == Some(true) {
            clear_other_mains(&mut tx, product_id, id).await?;
        }
        let row = sqlx::query(&format!(
            "UPDATE product_images SET url = $2, public_id = $3, file_name = $4,
                    is_main = COALESCE($5, is_main)
             WHERE id = $1
             RETURNING {IMAGE_COLUMNS}"
        ))
        .bind(id)
        .bind(&replacement.asset.url)
        .bind(&replacement.asset.public_id)
        .bind(&replacement.file_name)
        .bind(replacement.is_main)
        .fetch_one(&mut *tx)
        .await?;
        let updated = image_from_row(&row)?;
        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn set_main_image(&self, id: i64) -> Result<Option<ProductImage>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(product_id) = lock_image_product(&mut tx, id).await? else {
            return Ok(None);
        };
        // Clear before set: the partial unique index allows one main per product.
        clear_other_mains(&mut tx, product_id, id).await?;
        let row = sqlx::query(&format!(
            "UPDATE product_images SET is_main = true WHERE id = $1 RETURNING {IMAGE_COLUMNS}"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        let updated = image_from_row(&row)?;
        tx.commit().await?;
        Ok(Some(updated))
    }

    async fn delete_image(&self, id: i64) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM product_images WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

/// Row lock on the product serializes every main-flag change for it.
async fn lock_product(
    tx: &mut Transaction<'static, Postgres>,
    product_id: i64,
) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT id FROM products WHERE id = $1 FOR UPDATE")
        .bind(product_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.is_some())
}

/// Locks the image's product, then the image. `None` when either is gone.
async fn lock_image_product(
    tx: &mut Transaction<'static, Postgres>,
    id: i64,
) -> Result<Option<i64>, StoreError> {
    let row = sqlx::query("SELECT product_id FROM product_images WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    let Some(product_id) = row.map(|r| r.try_get::<i64, _>("product_id")).transpose()? else {
        return Ok(None);
    };
    if !lock_product(tx, product_id).await? {
        return Ok(None);
    }
    let still_there = sqlx::query("SELECT id FROM product_images WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(still_there.map(|_| product_id))
}

async fn clear_other_mains(
    tx: &mut Transaction<'static, Postgres>,
    product_id: i64,
    keep: i64,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE product_images SET is_main = false WHERE product_id = $1 AND id <> $2 AND is_main",
    )
    .bind(product_id)
    .bind(keep)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Escapes LIKE wildcards so the search text matches literally.
fn like_pattern(search: &str) -> String {
    let mut escaped = String::with_capacity(search.len() + 2);
    escaped.push('%');
    for c in search.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let role: String = row.try_get("role")?;
    Ok(User {
        auth_id: row.try_get("auth_id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        role: role
            .parse::<Role>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        last_seen: row.try_get("last_seen")?,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session, StoreError> {
    Ok(Session {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        user_agent: row.try_get("user_agent")?,
        ip_address: row.try_get("ip_address")?,
        expires_at: row.try_get("expires_at")?,
        last_active: row.try_get("last_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    Ok(Product {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        composition: row.try_get("composition")?,
        description: row.try_get("description")?,
        price: row.try_get("price")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn image_from_row(row: &PgRow) -> Result<ProductImage, StoreError> {
    Ok(ProductImage {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        url: row.try_get("url")?,
        public_id: row.try_get("public_id")?,
        file_name: row.try_get("file_name")?,
        is_main: row.try_get("is_main")?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::image::MediaAsset;
    use crate::domain::product::ProductQuery;
    use sqlx::postgres::PgPoolOptions;
    use time::Duration;

    const NEEDS_DB: &str = "requires DATABASE_URL pointing at a scratch Postgres";

    async fn store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect(NEEDS_DB);
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .unwrap();
        crate::infra::db::migrate(&pool).await.unwrap();
        PgStore::new(pool)
    }

    async fn user(store: &PgStore) -> User {
        let auth_id = Uuid::new_v4();
        store
            .create_user(&NewUser {
                auth_id,
                name: "Sari".into(),
                email: format!("{auth_id}@example.com"),
                role: Role::ProductionAdmin,
            })
            .await
            .unwrap()
    }

    async fn session(store: &PgStore, user_id: Uuid, created_at: OffsetDateTime) -> Session {
        let mut tx = store.begin().await.unwrap();
        let fresh =
            NewSession::starting_at(user_id, None, "unknown".into(), created_at, Duration::days(30));
        let row = tx.insert_session(&fresh).await.unwrap();
        tx.commit().await.unwrap();
        row
    }

    async fn product(store: &PgStore, name: &str, description: Option<&str>, category: &str) -> Product {
        store
            .create_product(&ProductInput {
                name: name.into(),
                category: Some(category.into()),
                composition: None,
                description: description.map(Into::into),
                price: 12_500,
            })
            .await
            .unwrap()
    }

    async fn image(store: &PgStore, product_id: i64, is_main: bool) -> ProductImage {
        let tag = Uuid::new_v4();
        store
            .insert_image(&NewImage {
                product_id,
                asset: MediaAsset {
                    url: format!("https://res.cloudinary.test/{tag}.png"),
                    public_id: format!("products/{tag}"),
                },
                file_name: format!("{tag}.png"),
                is_main,
            })
            .await
            .unwrap()
    }

    async fn mains(store: &PgStore, product_id: i64) -> Vec<i64> {
        store
            .product_images(product_id)
            .await
            .unwrap()
            .into_iter()
            .filter(|i| i.is_main)
            .map(|i| i.id)
            .collect()
    }

    fn unique_category() -> String {
        format!("cat-{}", Uuid::new_v4())
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
    async fn touch_session_checks_owner_and_expiry() {
        let store = store().await;
        let owner = user(&store).await;
        let stranger = user(&store).await;
        let created = OffsetDateTime::now_utc() - Duration::hours(1);
        let row = session(&store, owner.auth_id, created).await;

        let mut tx = store.begin().await.unwrap();
        assert!(tx
            .touch_session(row.id, stranger.auth_id, OffsetDateTime::now_utc())
            .await
            .unwrap()
            .is_none());
        assert!(tx
            .touch_session(row.id, owner.auth_id, row.expires_at + Duration::seconds(1))
            .await
            .unwrap()
            .is_none());
        let touched = tx
            .touch_session(row.id, owner.auth_id, OffsetDateTime::now_utc())
            .await
            .unwrap()
            .unwrap();
        tx.commit().await.unwrap();
        assert!(touched.last_active > row.last_active);
        assert_eq!(touched.expires_at, row.expires_at);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
    async fn dropped_transaction_leaves_no_user() {
        let store = store().await;
        let auth_id = Uuid::new_v4();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_user(&NewUser {
                auth_id,
                name: "Eko".into(),
                email: format!("{auth_id}@example.com"),
                role: Role::Supervisor,
            })
            .await
            .unwrap();
        }
        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_user(auth_id).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
    async fn duplicate_user_is_a_conflict() {
        let store = store().await;
        let existing = user(&store).await;
        let again = store
            .create_user(&NewUser {
                auth_id: existing.auth_id,
                name: existing.name.clone(),
                email: existing.email.clone(),
                role: existing.role,
            })
            .await;
        assert!(matches!(again, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
    async fn delete_session_removes_exactly_one_row() {
        let store = store().await;
        let owner = user(&store).await;
        let now = OffsetDateTime::now_utc();
        let a = session(&store, owner.auth_id, now).await;
        let b = session(&store, owner.auth_id, now).await;

        assert!(store.delete_session(a.id).await.unwrap());
        assert!(!store.delete_session(a.id).await.unwrap());

        let mut tx = store.begin().await.unwrap();
        assert!(tx.touch_session(b.id, owner.auth_id, now).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
    async fn new_session_sweeps_expired_ones() {
        let store = store().await;
        let owner = user(&store).await;
        let old = session(&store, owner.auth_id, OffsetDateTime::now_utc() - Duration::days(40)).await;
        session(&store, owner.auth_id, OffsetDateTime::now_utc()).await;
        assert!(!store.delete_session(old.id).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
    async fn list_pages_with_inclusive_cursor_search_and_main_image() {
        let store = store().await;
        let category = unique_category();
        let a = product(&store, "Keripik Singkong", None, &category).await;
        let b = product(&store, "Kopi Bubuk", Some("robusta, KERIPIK-free"), &category).await;
        let c = product(&store, "Teh Melati", None, &category).await;
        let main = image(&store, c.id, true).await;
        image(&store, c.id, false).await;

        let filter = ProductQuery {
            limit: Some(2),
            category: Some(category.clone()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        let rows = store.list_products(&filter).await.unwrap();
        let page = crate::domain::product::Page::from_overfetch(rows, filter.limit);
        let ids: Vec<i64> = page.items.iter().map(|s| s.product.id).collect();
        assert_eq!(ids, vec![c.id, b.id]);
        assert_eq!(page.next_cursor, Some(a.id));
        assert_eq!(page.items[0].main_image.as_ref().map(|i| i.id), Some(main.id));
        assert!(page.items[1].main_image.is_none());

        let filter = ProductQuery {
            limit: Some(2),
            cursor: Some(b.id),
            category: Some(category.clone()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        let ids: Vec<i64> = store
            .list_products(&filter)
            .await
            .unwrap()
            .iter()
            .map(|s| s.product.id)
            .collect();
        assert_eq!(ids, vec![b.id, a.id]);

        let filter = ProductQuery {
            search: Some("keripik".into()),
            category: Some(category),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        let mut ids: Vec<i64> = store
            .list_products(&filter)
            .await
            .unwrap()
            .iter()
            .map(|s| s.product.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
    async fn patch_distinguishes_absent_from_null() {
        let store = store().await;
        let created = product(&store, "Sambal", Some("pedas"), &unique_category()).await;
        let patch: ProductPatch = serde_json::from_str(r#"{"category": null, "price": 20000}"#).unwrap();
        let updated = store.update_product(created.id, &patch).await.unwrap().unwrap();
        assert_eq!(updated.category, None);
        assert_eq!(updated.description.as_deref(), Some("pedas"));
        assert_eq!(updated.name, "Sambal");
        assert_eq!(updated.price, 20_000);
        assert!(store.update_product(-1, &patch).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
    async fn main_flag_stays_unique_across_insert_replace_and_set() {
        let store = store().await;
        let p = product(&store, "Dodol", None, &unique_category()).await;
        let first = image(&store, p.id, true).await;
        let second = image(&store, p.id, true).await;
        assert_eq!(mains(&store, p.id).await, vec![second.id]);

        store.set_main_image(first.id).await.unwrap().unwrap();
        assert_eq!(mains(&store, p.id).await, vec![first.id]);

        let tag = Uuid::new_v4();
        let replaced = store
            .replace_image(
                second.id,
                &ImageReplacement {
                    asset: MediaAsset {
                        url: format!("https://res.cloudinary.test/{tag}.png"),
                        public_id: format!("products/{tag}"),
                    },
                    file_name: "back.png".into(),
                    is_main: Some(true),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replaced.file_name, "back.png");
        assert_eq!(mains(&store, p.id).await, vec![second.id]);

        assert!(store.set_main_image(-1).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
    async fn concurrent_set_main_serializes_per_product() {
        let store = store().await;
        let p = product(&store, "Rendang", None, &unique_category()).await;
        let mut ids = Vec::new();
        for _ in 0..4 {
            ids.push(image(&store, p.id, false).await.id);
        }

        let mut tasks = Vec::new();
        for _ in 0..5 {
            for &id in &ids {
                let store = store.clone();
                tasks.push(tokio::spawn(async move { store.set_main_image(id).await }));
            }
        }
        for task in tasks {
            assert!(task.await.unwrap().unwrap().is_some());
        }
        assert_eq!(mains(&store, p.id).await.len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a scratch Postgres"]
    async fn deleting_product_cascades_to_images() {
        let store = store().await;
        let p = product(&store, "Madu", None, &unique_category()).await;
        let img = image(&store, p.id, true).await;
        assert!(store.delete_product(p.id).await.unwrap());
        assert!(store.find_image(img.id).await.unwrap().is_none());
        assert!(store.get_product(p.id).await.unwrap().is_none());
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("gula"), "%gula%");
        assert_eq!(like_pattern("50%_off"), r"%50\%\_off%");
        assert_eq!(like_pattern(r"a\b"), r"%a\\b%");
    }
}
