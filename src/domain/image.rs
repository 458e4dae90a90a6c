use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{AppError, FieldErrors};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductImage {
    pub id: i64,
    pub product_id: i64,
    pub url: String,
    pub public_id: String,
    pub file_name: String,
    pub is_main: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

/// What the media service hands back for a stored asset.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAsset {
    pub url: String,
    pub public_id: String,
}

#[derive(Debug, Clone)]
pub struct NewImage {
    pub product_id: i64,
    pub asset: MediaAsset,
    pub file_name: String,
    pub is_main: bool,
}

#[derive(Debug, Clone)]
pub struct ImageReplacement {
    pub asset: MediaAsset,
    pub file_name: String,
    pub is_main: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUpload {
    /// Base64 payload or data URI.
    pub image: String,
    pub file_name: String,
    #[serde(default)]
    pub is_main: bool,
}

impl ImageUpload {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = FieldErrors::new();
        check_payload(&mut errors, &self.image);
        if self.file_name.trim().is_empty() {
            errors.add("file_name", "File name must not be empty");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageReplace {
    pub image: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub is_main: Option<bool>,
}

impl ImageReplace {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = FieldErrors::new();
        check_payload(&mut errors, &self.image);
        errors.into_result()
    }
}

fn check_payload(errors: &mut FieldErrors, image: &str) {
    if image.trim().is_empty() {
        errors.add("image", "Image data must not be empty");
    }
}

/// Main image first, then newest upload first.
pub fn sort_for_display(images: &mut [ProductImage]) {
    images.sort_by(|a, b| {
        b.is_main
            .cmp(&a.is_main)
            .then(b.uploaded_at.cmp(&a.uploaded_at))
            .then(b.id.cmp(&a.id))
    });
}
