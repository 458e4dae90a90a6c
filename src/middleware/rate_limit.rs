use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::error::AppError;
use crate::security::context::{extract_ip, UNKNOWN_ADDRESS};
use crate::state::AppState;

/// Throttles the public credential endpoints per client address and path.
pub async fn limit_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = extract_ip(req.headers()).unwrap_or_else(|| UNKNOWN_ADDRESS.to_string());
    let key = format!("{}:{}", ip, req.uri().path());

    if !state.limiter.check(&key) {
        warn!(%key, "auth rate limit exceeded");
        return Err(AppError::RateLimited);
    }
    Ok(next.run(req).await)
}
