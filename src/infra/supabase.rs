use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ExternalIdentity, IdentityProvider, ProviderError, ProviderSession};
use crate::config::first_env;

/// Supabase Auth (GoTrue) over its REST API.
#[derive(Clone)]
pub struct SupabaseAuth {
    url: String,
    anon_key: String,
    service_role_key: String,
    http: Client,
}

impl SupabaseAuth {
    pub fn new(url: String, anon_key: String, service_role_key: String, http: Client) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key,
            service_role_key,
            http,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let url = first_env(&[
            "SUPABASE_URL",
            "VITE_SUPABASE_URL",
            "REACT_APP_SUPABASE_URL",
        ])
        .ok_or_else(|| {
            anyhow::anyhow!("Supabase URL missing (set SUPABASE_URL or VITE_SUPABASE_URL)")
        })?;
        let anon_key = first_env(&[
            "SUPABASE_ANON_KEY",
            "SUPABASE_KEY",
            "SUPABASE_PUBLIC_ANON_KEY",
            "SUPABASE_PUBLISHABLE_KEY",
            "VITE_SUPABASE_PUBLISHABLE_DEFAULT_KEY",
            "REACT_APP_SUPABASE_PUBLISHABLE_DEFAULT_KEY",
        ])
        .ok_or_else(|| anyhow::anyhow!("Supabase anon/publishable key missing"))?;
        let service_role_key = first_env(&["SUPABASE_SERVICE_ROLE_KEY", "SUPABASE_SERVICE_KEY", "SERVICE_ROLE_KEY"])
            .unwrap_or_else(|| {
                warn!("SUPABASE_SERVICE_ROLE_KEY not set; /auth/register will be unavailable");
                String::new()
            });

        let http = Client::builder()
            .user_agent("produksi-api")
            .build()?;

        Ok(Self::new(url, anon_key, service_role_key, http))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.url, path)
    }

    fn public(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.anon_key)
    }

    fn service(&self, req: RequestBuilder) -> Result<RequestBuilder, ProviderError> {
        if self.service_role_key.is_empty() {
            return Err(ProviderError::MissingServiceKey);
        }
        Ok(req
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key))
    }
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    full_name: Option<String>,
}

impl From<GoTrueUser> for ExternalIdentity {
    fn from(user: GoTrueUser) -> Self {
        ExternalIdentity {
            id: user.id,
            email: user.email.unwrap_or_default(),
            display_name: user.user_metadata.full_name.filter(|n| !n.trim().is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: GoTrueUser,
}

/// Sign-up answers with a session when email confirmation is off, and with
/// the bare user otherwise.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpReply {
    WithSession { user: GoTrueUser },
    Bare(GoTrueUser),
}

#[derive(Debug, Default, Deserialize)]
struct GoTrueError {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

fn error_message(body: &str) -> String {
    let parsed: GoTrueError = serde_json::from_str(body).unwrap_or_default();
    parsed
        .error_description
        .or(parsed.msg)
        .or(parsed.message)
        .or(parsed.error)
        .unwrap_or_else(|| "Failed to create account".to_string())
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ProviderError> {
    serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))
}

async fn send(req: RequestBuilder) -> Result<(StatusCode, String), ProviderError> {
    let res = req
        .send()
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))?;
    let status = res.status();
    let body = res
        .text()
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))?;
    Ok((status, body))
}

fn unexpected(status: StatusCode, body: String) -> ProviderError {
    ProviderError::Unexpected {
        status: status.as_u16(),
        body,
    }
}

fn sign_up_identity(status: StatusCode, body: String) -> Result<ExternalIdentity, ProviderError> {
    if status.is_success() {
        let reply: SignUpReply = decode(&body)?;
        let user = match reply {
            SignUpReply::WithSession { user } | SignUpReply::Bare(user) => user,
        };
        Ok(user.into())
    } else if status.is_client_error() {
        Err(ProviderError::Rejected(error_message(&body)))
    } else {
        Err(unexpected(status, body))
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<ExternalIdentity, ProviderError> {
        let req = self.public(self.http.post(self.endpoint("signup"))).json(&json!({
            "email": email,
            "password": password,
            "data": { "full_name": name },
        }));
        let (status, body) = send(req).await?;
        sign_up_identity(status, body)
    }

    async fn create_confirmed_user(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<ExternalIdentity, ProviderError> {
        let req = self
            .service(self.http.post(self.endpoint("admin/users")))?
            .json(&json!({
                "email": email,
                "password": password,
                "email_confirm": true,
                "user_metadata": { "full_name": name },
            }));
        let (status, body) = send(req).await?;
        sign_up_identity(status, body)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError> {
        let req = self
            .public(self.http.post(self.endpoint("token")))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));
        let (status, body) = send(req).await?;
        match status {
            s if s.is_success() => {
                let grant: TokenGrant = decode(&body)?;
                Ok(ProviderSession {
                    access_token: grant.access_token,
                    refresh_token: grant.refresh_token,
                    expires_in: grant.expires_in,
                    identity: grant.user.into(),
                })
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::UNPROCESSABLE_ENTITY => {
                debug!(reason = %error_message(&body), "password sign-in rejected");
                Err(ProviderError::InvalidCredentials)
            }
            s => Err(unexpected(s, body)),
        }
    }

    async fn verify_token(&self, token: &str) -> Result<ExternalIdentity, ProviderError> {
        let req = self
            .public(self.http.get(self.endpoint("user")))
            .bearer_auth(token);
        let (status, body) = send(req).await?;
        if status.is_success() {
            let user: GoTrueUser = decode(&body)?;
            Ok(user.into())
        } else if status.is_client_error() {
            Err(ProviderError::InvalidToken)
        } else {
            Err(unexpected(status, body))
        }
    }

    async fn sign_out(&self, token: &str) -> Result<(), ProviderError> {
        let req = self
            .public(self.http.post(self.endpoint("logout")))
            .bearer_auth(token);
        let (status, body) = send(req).await?;
        // An already-invalid token has nothing left to revoke.
        if status.is_success() || status == StatusCode::UNAUTHORIZED {
            Ok(())
        } else {
            Err(unexpected(status, body))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_strips_trailing_slash() {
        let auth = SupabaseAuth::new(
            "https://abc.supabase.co/".into(),
            "anon".into(),
            String::new(),
            Client::new(),
        );
        assert_eq!(auth.endpoint("user"), "https://abc.supabase.co/auth/v1/user");
    }

    #[test]
    fn admin_calls_need_service_key() {
        let auth = SupabaseAuth::new("https://abc.supabase.co".into(), "anon".into(), String::new(), Client::new());
        let req = auth.http.post(auth.endpoint("admin/users"));
        assert!(matches!(auth.service(req), Err(ProviderError::MissingServiceKey)));
    }

    #[test]
    fn user_maps_to_identity() {
        let id = Uuid::new_v4();
        let body = format!(
            r#"{{"id":"{id}","email":"rina@example.com","user_metadata":{{"full_name":"Rina"}}}}"#
        );
        let identity: ExternalIdentity = decode::<GoTrueUser>(&body).unwrap().into();
        assert_eq!(identity.id, id);
        assert_eq!(identity.email, "rina@example.com");
        assert_eq!(identity.display_name.as_deref(), Some("Rina"));
    }

    #[test]
    fn sign_up_reply_accepts_both_shapes() {
        let id = Uuid::new_v4();
        let bare = format!(r#"{{"id":"{id}","email":"a@b.co"}}"#);
        let wrapped = format!(r#"{{"access_token":"t","user":{{"id":"{id}","email":"a@b.co"}}}}"#);
        for body in [bare, wrapped] {
            let identity = sign_up_identity(StatusCode::OK, body).unwrap();
            assert_eq!(identity.id, id);
            assert_eq!(identity.display_name, None);
        }
    }

    #[test]
    fn sign_up_rejection_carries_provider_message() {
        let err = sign_up_identity(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"code":422,"msg":"User already registered"}"#.into(),
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(m) if m == "User already registered"));

        let err = sign_up_identity(StatusCode::BAD_GATEWAY, "upstream".into()).unwrap_err();
        assert!(matches!(err, ProviderError::Unexpected { status: 502, .. }));
    }

    #[test]
    fn error_message_prefers_description() {
        let body = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        assert_eq!(error_message(body), "Invalid login credentials");
        assert_eq!(error_message("not json"), "Failed to create account");
    }
}
