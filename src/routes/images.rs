use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::domain::image::{ImageReplace, ImageReplacement, ImageUpload, NewImage, ProductImage};
use crate::error::AppError;
use crate::routes::extract::{JsonBody, PathParam};
use crate::middleware::auth::CurrentUser;
use crate::state::AppState;

pub fn router(upload_limit: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/products/:id/images", get(list).post(upload))
        .route("/images/:id", put(replace).delete(remove))
        .route("/images/:id/main", post(set_main))
        .layer(DefaultBodyLimit::max(upload_limit))
}

async fn list(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    PathParam(product_id): PathParam<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.catalog.product_exists(product_id).await? {
        return Err(AppError::NotFound("Product"));
    }
    let images = state.catalog.product_images(product_id).await?;
    Ok(Json(json!({ "images": images })))
}

async fn upload(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    PathParam(product_id): PathParam<i64>,
    JsonBody(payload): JsonBody<ImageUpload>,
) -> Result<(StatusCode, Json<ProductImage>), AppError> {
    payload.validate()?;
    if !state.catalog.product_exists(product_id).await? {
        return Err(AppError::NotFound("Product"));
    }

    let asset = state.media.upload(&payload.image, &payload.file_name).await?;
    let public_id = asset.public_id.clone();
    let inserted = state
        .catalog
        .insert_image(&NewImage {
            product_id,
            asset,
            file_name: payload.file_name,
            is_main: payload.is_main,
        })
        .await;

    match inserted {
        Ok(image) => {
            info!(product_id, image_id = image.id, is_main = image.is_main, "image uploaded");
            Ok((StatusCode::CREATED, Json(image)))
        }
        Err(err) => {
            // The row never landed, so the uploaded asset is orphaned.
            if let Err(cleanup) = state.media.destroy(&public_id).await {
                error!(%public_id, %cleanup, "failed to remove orphaned upload");
            }
            Err(err.into())
        }
    }
}

async fn replace(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    PathParam(id): PathParam<i64>,
    JsonBody(payload): JsonBody<ImageReplace>,
) -> Result<Json<ProductImage>, AppError> {
    payload.validate()?;
    let current = state
        .catalog
        .find_image(id)
        .await?
        .ok_or(AppError::NotFound("Image"))?;

    let file_name = payload
        .file_name
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| current.file_name.clone());
    let asset = state.media.upload(&payload.image, &file_name).await?;
    let new_public_id = asset.public_id.clone();

    let updated = state
        .catalog
        .replace_image(
            id,
            &ImageReplacement {
                asset,
                file_name,
                is_main: payload.is_main,
            },
        )
        .await;
    let updated = match updated {
        Ok(Some(image)) => image,
        Ok(None) => {
            discard_upload(&state, &new_public_id).await;
            return Err(AppError::NotFound("Image"));
        }
        Err(err) => {
            discard_upload(&state, &new_public_id).await;
            return Err(err.into());
        }
    };

    if current.public_id != updated.public_id {
        if let Err(err) = state.media.destroy(&current.public_id).await {
            warn!(public_id = %current.public_id, %err, "failed to remove replaced media");
        }
    }
    info!(image_id = id, "image replaced");
    Ok(Json(updated))
}

async fn discard_upload(state: &AppState, public_id: &str) {
    if let Err(err) = state.media.destroy(public_id).await {
        error!(%public_id, %err, "failed to remove orphaned upload");
    }
}

async fn remove(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    PathParam(id): PathParam<i64>,
) -> Result<StatusCode, AppError> {
    let image = state
        .catalog
        .find_image(id)
        .await?
        .ok_or(AppError::NotFound("Image"))?;

    state.media.destroy(&image.public_id).await?;
    if !state.catalog.delete_image(id).await? {
        return Err(AppError::NotFound("Image"));
    }
    info!(image_id = id, product_id = image.product_id, "image deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn set_main(
    State(state): State<Arc<AppState>>,
    _user: CurrentUser,
    PathParam(id): PathParam<i64>,
) -> Result<Json<ProductImage>, AppError> {
    let image = state
        .catalog
        .set_main_image(id)
        .await?
        .ok_or(AppError::NotFound("Image"))?;
    info!(image_id = id, product_id = image.product_id, "main image set");
    Ok(Json(image))
}
