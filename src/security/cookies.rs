use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue};
use cookie::time::Duration as CookieDuration;
use cookie::Cookie;
use time::OffsetDateTime;
use tracing::warn;

use super::config::SecurityConfig;
use crate::domain::session::Session;

pub fn session_cookie(cfg: &SecurityConfig, session: &Session) -> String {
    let remaining = (session.expires_at - OffsetDateTime::now_utc()).whole_seconds().max(0);
    build(cfg, session.id.to_string(), remaining)
}

pub fn cleared_session_cookie(cfg: &SecurityConfig) -> String {
    build(cfg, String::new(), 0)
}

fn build(cfg: &SecurityConfig, value: String, max_age_secs: i64) -> String {
    Cookie::build((cfg.session_cookie_name.clone(), value))
        .http_only(true)
        .secure(cfg.secure_cookies)
        .same_site(cfg.same_site)
        .max_age(CookieDuration::seconds(max_age_secs))
        .path("/")
        .build()
        .to_string()
}

pub fn append_set_cookie(headers: &mut HeaderMap, cookie: String) {
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(err) => warn!(%err, "dropping unencodable Set-Cookie header"),
    }
}

/// Whether a `Set-Cookie` header for `name` is already present.
pub fn sets_cookie(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| Cookie::parse(v.to_string()).ok())
        .any(|c| c.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use uuid::Uuid;

    fn session(ttl: Duration) -> Session {
        let now = OffsetDateTime::now_utc();
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            user_agent: None,
            ip_address: "unknown".into(),
            expires_at: now + ttl,
            last_active: now,
            created_at: now,
        }
    }

    #[test]
    fn session_cookie_carries_id_and_flags() {
        let cfg = SecurityConfig::default();
        let s = session(Duration::days(30));
        let raw = session_cookie(&cfg, &s);
        let parsed = Cookie::parse(raw).unwrap();
        assert_eq!(parsed.name(), "session_id");
        assert_eq!(parsed.value(), s.id.to_string());
        assert_eq!(parsed.http_only(), Some(true));
        assert_eq!(parsed.secure(), Some(true));
        assert_eq!(parsed.path(), Some("/"));
        let max_age = parsed.max_age().unwrap().whole_seconds();
        assert!(max_age > Duration::days(29).whole_seconds());
    }

    #[test]
    fn cleared_cookie_expires_immediately() {
        let parsed = Cookie::parse(cleared_session_cookie(&SecurityConfig::default())).unwrap();
        assert_eq!(parsed.value(), "");
        assert_eq!(parsed.max_age().unwrap().whole_seconds(), 0);
    }

    #[test]
    fn detects_existing_set_cookie() {
        let cfg = SecurityConfig::default();
        let mut headers = HeaderMap::new();
        assert!(!sets_cookie(&headers, "session_id"));
        append_set_cookie(&mut headers, cleared_session_cookie(&cfg));
        assert!(sets_cookie(&headers, "session_id"));
        assert!(!sets_cookie(&headers, "other"));
    }
}
