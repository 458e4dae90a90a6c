use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

pub const DEFAULT_SESSION_TTL_DAYS: i64 = 30;

/// Server-side record of a signed-in client. Its expiry is independent of
/// the provider token's expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_agent: Option<String>,
    pub ip_address: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_active: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Session {
    pub fn is_live_at(&self, at: OffsetDateTime) -> bool {
        self.expires_at > at
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_agent: Option<String>,
    pub ip_address: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl NewSession {
    pub fn starting_at(
        user_id: Uuid,
        user_agent: Option<String>,
        ip_address: String,
        created_at: OffsetDateTime,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            user_agent,
            ip_address,
            created_at,
            expires_at: created_at + ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_expires_after_ttl() {
        let now = OffsetDateTime::now_utc();
        let s = NewSession::starting_at(
            Uuid::new_v4(),
            None,
            "unknown".into(),
            now,
            Duration::days(DEFAULT_SESSION_TTL_DAYS),
        );
        assert_eq!(s.expires_at - s.created_at, Duration::days(30));
    }

    #[test]
    fn session_is_dead_at_expiry() {
        let now = OffsetDateTime::now_utc();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            user_agent: None,
            ip_address: "10.0.0.1".into(),
            expires_at: now,
            last_active: now - Duration::hours(1),
            created_at: now - Duration::days(30),
        };
        assert!(!session.is_live_at(now));
        assert!(session.is_live_at(now - Duration::seconds(1)));
    }
}
