use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

use super::image::ProductImage;
use crate::error::{AppError, FieldErrors};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
    pub composition: Option<String>,
    pub description: Option<String>,
    /// Smallest currency unit.
    pub price: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// List entry: the product plus its main image, if one is flagged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSummary {
    #[serde(flatten)]
    pub product: Product,
    pub main_image: Option<ProductImage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: Product,
    pub images: Vec<ProductImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductInput {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub composition: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub price: i64,
}

impl ProductInput {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = FieldErrors::new();
        check_name(&mut errors, &self.name);
        check_price(&mut errors, self.price);
        errors.into_result()
    }
}

/// Partial update. Nullable columns distinguish "absent" (`None`) from
/// "set to null" (`Some(None)`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub category: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub composition: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub price: Option<i64>,
}

impl ProductPatch {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = FieldErrors::new();
        if let Some(name) = &self.name {
            check_name(&mut errors, name);
        }
        if let Some(price) = self.price {
            check_price(&mut errors, price);
        }
        errors.into_result()
    }

    pub fn apply(&self, product: &mut Product) {
        if let Some(name) = &self.name {
            product.name = name.clone();
        }
        if let Some(category) = &self.category {
            product.category = category.clone();
        }
        if let Some(composition) = &self.composition {
            product.composition = composition.clone();
        }
        if let Some(description) = &self.description {
            product.description = description.clone();
        }
        if let Some(price) = self.price {
            product.price = price;
        }
    }
}

fn nullable<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

fn check_name(errors: &mut FieldErrors, name: &str) {
    if name.trim().is_empty() {
        errors.add("name", "Product name must not be empty");
    }
}

fn check_price(errors: &mut FieldErrors, price: i64) {
    if price <= 0 {
        errors.add("price", "Price must be positive");
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductQuery {
    pub limit: Option<u32>,
    pub cursor: Option<i64>,
    pub search: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductFilter {
    pub limit: u32,
    pub cursor: Option<i64>,
    pub search: Option<String>,
    pub category: Option<String>,
}

impl ProductQuery {
    pub fn into_filter(self) -> Result<ProductFilter, AppError> {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            let mut errors = FieldErrors::new();
            errors.add("limit", format!("limit must be between 1 and {MAX_PAGE_SIZE}"));
            return Err(AppError::Validation(errors));
        }
        Ok(ProductFilter {
            limit,
            cursor: self.cursor,
            search: non_blank(self.search),
            category: non_blank(self.category),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl ProductFilter {
    /// In-process equivalent of the list query's WHERE clause.
    pub fn matches(&self, product: &Product) -> bool {
        if let Some(cursor) = self.cursor {
            if product.id > cursor {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if product.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let hit = |field: Option<&str>| {
                field.is_some_and(|f| f.to_lowercase().contains(&needle))
            };
            if !hit(Some(&product.name)) && !hit(product.description.as_deref()) {
                return false;
            }
        }
        true
    }

    pub fn fetch_size(&self) -> i64 {
        i64::from(self.limit) + 1
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<i64>,
}

impl Page<ProductSummary> {
    /// Builds a page from `limit + 1` rows; the extra row becomes the next cursor.
    pub fn from_overfetch(mut rows: Vec<ProductSummary>, limit: u32) -> Self {
        let next_cursor = if rows.len() > limit as usize {
            rows.pop().map(|extra| extra.product.id)
        } else {
            None
        };
        Page {
            items: rows,
            next_cursor,
        }
    }
}
