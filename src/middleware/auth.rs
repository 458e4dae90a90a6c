use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::security::context::{Authenticated, RequestContext, RequestCredentials};
use crate::security::cookies;
use crate::state::AppState;

/// Resolves the caller once per request and stores the outcome as a
/// [`RequestContext`] extension. A session opened during resolution is
/// handed back as the session cookie.
pub async fn resolve_identity(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let creds = RequestCredentials::from_headers(req.headers(), &state.security.session_cookie_name);
    let ctx = state.resolver.resolve(&creds).await?;

    let fresh_session = ctx
        .authenticated()
        .filter(|auth| auth.session_created)
        .map(|auth| auth.session.clone());
    req.extensions_mut().insert(ctx);

    let mut res = next.run(req).await;
    if let Some(session) = fresh_session {
        let name = &state.security.session_cookie_name;
        if !cookies::sets_cookie(res.headers(), name) {
            cookies::append_set_cookie(
                res.headers_mut(),
                cookies::session_cookie(&state.security, &session),
            );
        }
    }
    Ok(res)
}

/// Handler argument for routes that require an authenticated caller.
pub struct CurrentUser(pub Authenticated);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<RequestContext>() {
            Some(RequestContext::Authenticated(auth)) => Ok(CurrentUser(auth.as_ref().clone())),
            _ => Err(AppError::Unauthorized),
        }
    }
}
