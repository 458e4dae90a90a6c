use axum::http::{header, HeaderMap};
use cookie::Cookie;
use uuid::Uuid;

use crate::domain::session::Session;
use crate::domain::user::User;

pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Request details recorded on the session row.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMeta {
    pub user_agent: Option<String>,
    pub ip_address: String,
    pub prior_session: Option<Uuid>,
}

impl Default for RequestMeta {
    fn default() -> Self {
        Self {
            user_agent: None,
            ip_address: UNKNOWN_ADDRESS.to_string(),
            prior_session: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestCredentials {
    pub bearer: Option<String>,
    pub meta: RequestMeta,
}

impl RequestCredentials {
    pub fn from_headers(headers: &HeaderMap, session_cookie: &str) -> Self {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let prior_session = cookie_value(headers, session_cookie)
            .and_then(|raw| Uuid::parse_str(&raw).ok());
        Self {
            bearer: bearer_from_header(headers),
            meta: RequestMeta {
                user_agent,
                ip_address: extract_ip(headers).unwrap_or_else(|| UNKNOWN_ADDRESS.to_string()),
                prior_session,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Authenticated {
    pub user: User,
    pub session: Session,
    /// Provider access token the request was authenticated with.
    pub token: String,
    /// The session row was created while resolving this request.
    pub session_created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidToken,
    UnknownUser,
}

/// Identity attached to every request by the resolution middleware.
#[derive(Debug, Clone)]
pub enum RequestContext {
    Anonymous,
    Rejected(RejectReason),
    Authenticated(Box<Authenticated>),
}

impl RequestContext {
    pub fn authenticated(&self) -> Option<&Authenticated> {
        match self {
            RequestContext::Authenticated(auth) => Some(auth),
            _ => None,
        }
    }
}

pub fn bearer_from_header(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|part| Cookie::parse(part.trim().to_string()).ok())
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
}

/// First hop of `X-Forwarded-For`.
pub fn extract_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn bearer_token_is_extracted() {
        let h = headers(&[("authorization", "Bearer abc.def")]);
        assert_eq!(bearer_from_header(&h).as_deref(), Some("abc.def"));

        let h = headers(&[("authorization", "bearer   xyz ")]);
        assert_eq!(bearer_from_header(&h).as_deref(), Some("xyz"));
    }

    #[test]
    fn non_bearer_schemes_are_ignored() {
        assert_eq!(bearer_from_header(&headers(&[("authorization", "Basic Zm9v")])), None);
        assert_eq!(bearer_from_header(&headers(&[("authorization", "Bearer ")])), None);
        assert_eq!(bearer_from_header(&HeaderMap::new()), None);
    }

    #[test]
    fn session_cookie_is_found_among_others() {
        let id = Uuid::new_v4();
        let h = headers(&[("cookie", &format!("theme=dark; session_id={id}; lang=id"))]);
        assert_eq!(cookie_value(&h, "session_id"), Some(id.to_string()));
        assert_eq!(cookie_value(&h, "missing"), None);
    }

    #[test]
    fn credentials_collect_metadata() {
        let id = Uuid::new_v4();
        let h = headers(&[
            ("authorization", "Bearer tok"),
            ("user-agent", "curl/8.0"),
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("cookie", &format!("session_id={id}")),
        ]);
        let creds = RequestCredentials::from_headers(&h, "session_id");
        assert_eq!(creds.bearer.as_deref(), Some("tok"));
        assert_eq!(creds.meta.user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(creds.meta.ip_address, "203.0.113.7");
        assert_eq!(creds.meta.prior_session, Some(id));
    }

    #[test]
    fn malformed_session_cookie_and_missing_ip_fall_back() {
        let h = headers(&[("cookie", "session_id=not-a-uuid")]);
        let creds = RequestCredentials::from_headers(&h, "session_id");
        assert_eq!(creds.meta.prior_session, None);
        assert_eq!(creds.meta.ip_address, UNKNOWN_ADDRESS);
        assert_eq!(creds.bearer, None);
    }
}
