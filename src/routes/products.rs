use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tracing::info;

use crate::domain::product::{
    Page, Product, ProductDetail, ProductInput, ProductPatch, ProductQuery, ProductSummary,
};
use crate::error::AppError;
use crate::routes::extract::{JsonBody, PathParam, QueryParams};
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/products", get(list).post(create))
        .route("/products/categories", get(categories))
        .route("/products/:id", get(show).patch(update).delete(destroy))
}

async fn list(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    QueryParams(query): QueryParams<ProductQuery>,
) -> Result<Json<Page<ProductSummary>>, AppError> {
    let filter = query.into_filter()?;
    let rows = state.catalog.list_products(&filter).await?;
    Ok(Json(Page::from_overfetch(rows, filter.limit)))
}

async fn categories(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
) -> Result<Json<serde_json::Value>, AppError> {
    let categories = state.catalog.categories().await?;
    Ok(Json(json!({ "categories": categories })))
}

async fn show(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    PathParam(id): PathParam<i64>,
) -> Result<Json<ProductDetail>, AppError> {
    state
        .catalog
        .get_product(id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("Product"))
}

async fn create(
    State(state): State<Arc<AppState>>,
    CurrentUser(auth): CurrentUser,
    JsonBody(input): JsonBody<ProductInput>,
) -> Result<(StatusCode, Json<Product>), AppError> {
    input.validate()?;
    let product = state.catalog.create_product(&input).await?;
    info!(product_id = product.id, by = %auth.user.auth_id, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    PathParam(id): PathParam<i64>,
    JsonBody(patch): JsonBody<ProductPatch>,
) -> Result<Json<Product>, AppError> {
    patch.validate()?;
    state
        .catalog
        .update_product(id, &patch)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound("Product"))
}

async fn destroy(
    State(state): State<Arc<AppState>>,
    CurrentUser(auth): CurrentUser,
    PathParam(id): PathParam<i64>,
) -> Result<StatusCode, AppError> {
    let detail = state
        .catalog
        .get_product(id)
        .await?
        .ok_or(AppError::NotFound("Product"))?;

    for image in &detail.images {
        state.media.destroy(&image.public_id).await?;
    }
    if !state.catalog.delete_product(id).await? {
        return Err(AppError::NotFound("Product"));
    }
    info!(product_id = id, images = detail.images.len(), by = %auth.user.auth_id, "product deleted");
    Ok(StatusCode::NO_CONTENT)
}
