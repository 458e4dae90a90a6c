use cookie::SameSite;
use time::Duration;
use tracing::warn;

use crate::config::{env_bool, env_parse, env_string};
use crate::domain::session::DEFAULT_SESSION_TTL_DAYS;

#[derive(Clone, Debug)]
pub struct SecurityConfig {
    pub session_cookie_name: String,
    pub secure_cookies: bool,
    pub same_site: SameSite,
    pub session_ttl: Duration,
    /// Create a default-role local user when a verified identity has none.
    pub auto_provision_users: bool,
    pub auth_rate_limit: u32,
    pub auth_rate_window_secs: u64,
}

impl SecurityConfig {
    pub fn from_env() -> Self {
        let session_cookie_name =
            env_string("SESSION_COOKIE_NAME").unwrap_or_else(|| "session_id".into());

        let mut secure_cookies = env_bool("COOKIE_SECURE").unwrap_or(true);
        let same_site = env_same_site().unwrap_or(SameSite::Lax);

        if same_site == SameSite::None && !secure_cookies {
            warn!("SameSite=None requires secure cookies; forcing COOKIE_SECURE=true");
            secure_cookies = true;
        }

        let ttl_days: i64 = env_parse("SESSION_TTL_DAYS")
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_SESSION_TTL_DAYS);

        SecurityConfig {
            session_cookie_name,
            secure_cookies,
            same_site,
            session_ttl: Duration::days(ttl_days),
            auto_provision_users: env_bool("AUTO_PROVISION_USERS").unwrap_or(true),
            auth_rate_limit: env_parse("AUTH_RATE_LIMIT").unwrap_or(20),
            auth_rate_window_secs: env_parse("AUTH_RATE_WINDOW_SECS").unwrap_or(60),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            session_cookie_name: "session_id".into(),
            secure_cookies: true,
            same_site: SameSite::Lax,
            session_ttl: Duration::days(DEFAULT_SESSION_TTL_DAYS),
            auto_provision_users: true,
            auth_rate_limit: 20,
            auth_rate_window_secs: 60,
        }
    }
}

fn env_same_site() -> Option<SameSite> {
    env_string("COOKIE_SAMESITE").and_then(|v| match v.to_ascii_lowercase().as_str() {
        "none" => Some(SameSite::None),
        "lax" => Some(SameSite::Lax),
        "strict" => Some(SameSite::Strict),
        _ => None,
    })
}
