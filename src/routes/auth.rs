use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::domain::user::{NewUser, ProfilePatch, Role, User};
use crate::error::{AppError, FieldErrors};
use crate::middleware::{auth::CurrentUser, rate_limit::limit_auth};
use crate::routes::extract::JsonBody;
use crate::security::context::RequestCredentials;
use crate::security::cookies;
use crate::state::AppState;

/// Credential-taking routes. They never consult a prior identity, so they
/// sit outside the identity layer.
pub fn public_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/register", post(register))
        .route("/auth/sign-in", post(sign_in))
        .route_layer(from_fn_with_state(state, limit_auth))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/sign-out", post(sign_out))
        .route("/auth/me", get(me).patch(update_me))
}

const MIN_PASSWORD_LEN: usize = 6;
const MIN_NAME_LEN: usize = 2;
const MAX_EMAIL_LEN: usize = 255;

#[derive(Deserialize)]
struct SignUpPayload {
    email: String,
    password: String,
    name: String,
    #[serde(default)]
    role: Option<Role>,
}

#[derive(Deserialize)]
struct SignInPayload {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct SignInResponse {
    token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    user: User,
    session_id: uuid::Uuid,
}

fn validate_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && email.len() <= MAX_EMAIL_LEN
        }
        None => false,
    }
}

fn validate_name(errors: &mut FieldErrors, name: &str) {
    if name.trim().chars().count() < MIN_NAME_LEN {
        errors.add("name", format!("Name must be at least {MIN_NAME_LEN} characters"));
    }
}

impl SignUpPayload {
    fn validate(&self) -> Result<(), AppError> {
        let mut errors = FieldErrors::new();
        if !validate_email(self.email.trim()) {
            errors.add("email", "Invalid email address");
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.add(
                "password",
                format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
            );
        }
        validate_name(&mut errors, &self.name);
        errors.into_result()
    }
}

enum AccountOrigin {
    SelfService,
    Admin,
}

async fn sign_up(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<SignUpPayload>,
) -> Result<Response, AppError> {
    create_account(&state, payload, AccountOrigin::SelfService).await
}

async fn register(
    State(state): State<Arc<AppState>>,
    JsonBody(payload): JsonBody<SignUpPayload>,
) -> Result<Response, AppError> {
    create_account(&state, payload, AccountOrigin::Admin).await
}

async fn create_account(
    state: &AppState,
    payload: SignUpPayload,
    origin: AccountOrigin,
) -> Result<Response, AppError> {
    payload.validate()?;
    let email = payload.email.trim();
    let name = payload.name.trim();

    let identity = match origin {
        AccountOrigin::SelfService => state.identity.sign_up(email, &payload.password, name).await?,
        AccountOrigin::Admin => {
            state
                .identity
                .create_confirmed_user(email, &payload.password, name)
                .await?
        }
    };

    let user = state
        .accounts
        .create_user(&NewUser {
            auth_id: identity.id,
            name: name.to_string(),
            email: identity.email.clone(),
            role: payload.role.unwrap_or_default(),
        })
        .await
        .map_err(|err| {
            warn!(auth_id = %identity.id, %err, "provider account created but local mirror failed");
            AppError::from(err)
        })?;

    info!(auth_id = %user.auth_id, "account created");
    Ok((StatusCode::CREATED, Json(json!({ "user": user }))).into_response())
}

async fn sign_in(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<SignInPayload>,
) -> Result<Response, AppError> {
    let mut errors = FieldErrors::new();
    if payload.email.trim().is_empty() {
        errors.add("email", "Email is required");
    }
    if payload.password.is_empty() {
        errors.add("password", "Password is required");
    }
    errors.into_result()?;

    let grant = state
        .identity
        .sign_in_with_password(payload.email.trim(), &payload.password)
        .await?;

    let meta = RequestCredentials::from_headers(&headers, &state.security.session_cookie_name).meta;
    let auth = state
        .resolver
        .start_session(&grant.identity, &meta, &grant.access_token)
        .await?;

    info!(auth_id = %auth.user.auth_id, session_id = %auth.session.id, "signed in");
    let cookie = cookies::session_cookie(&state.security, &auth.session);
    let mut res = Json(SignInResponse {
        token: grant.access_token,
        refresh_token: grant.refresh_token,
        expires_in: grant.expires_in,
        session_id: auth.session.id,
        user: auth.user,
    })
    .into_response();
    cookies::append_set_cookie(res.headers_mut(), cookie);
    Ok(res)
}

async fn sign_out(
    State(state): State<Arc<AppState>>,
    CurrentUser(auth): CurrentUser,
) -> Result<Response, AppError> {
    let removed = state.accounts.delete_session(auth.session.id).await?;
    if let Err(err) = state.identity.sign_out(&auth.token).await {
        warn!(%err, "identity provider sign-out failed");
    }
    info!(session_id = %auth.session.id, removed, "signed out");

    let mut res = Json(json!({ "message": "Signed out" })).into_response();
    cookies::append_set_cookie(res.headers_mut(), cookies::cleared_session_cookie(&state.security));
    Ok(res)
}

async fn me(CurrentUser(auth): CurrentUser) -> Json<serde_json::Value> {
    Json(json!({ "user": auth.user }))
}

async fn update_me(
    State(state): State<Arc<AppState>>,
    CurrentUser(auth): CurrentUser,
    JsonBody(mut patch): JsonBody<ProfilePatch>,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(name) = patch.name.as_mut() {
        *name = name.trim().to_string();
        let mut errors = FieldErrors::new();
        validate_name(&mut errors, name);
        errors.into_result()?;
    }
    if patch.is_empty() {
        return Ok(Json(json!({ "user": auth.user })));
    }

    let user = state
        .accounts
        .update_profile(auth.user.auth_id, &patch)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    Ok(Json(json!({ "user": user })))
}
