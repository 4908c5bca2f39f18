//! Grant model - one row per issued session, owning the current refresh token.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct Grant {
    pub grant_id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Option<String>,
    pub scopes: Vec<String>,
    /// User security stamp at issuance; a later rotation invalidates the grant.
    pub security_stamp: String,
    pub refresh_token_hash: String,
    pub issued_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub rotated_utc: Option<DateTime<Utc>>,
    pub revoked_utc: Option<DateTime<Utc>>,
}

impl Grant {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        grant_id: Uuid,
        user_id: Uuid,
        tenant_id: Uuid,
        client_id: Option<String>,
        scopes: Vec<String>,
        security_stamp: String,
        refresh_token_hash: String,
        lifetime: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            grant_id,
            user_id,
            tenant_id,
            client_id,
            scopes,
            security_stamp,
            refresh_token_hash,
            issued_utc: now,
            expiry_utc: now + lifetime,
            rotated_utc: None,
            revoked_utc: None,
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_utc.is_none() && self.expiry_utc > now
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_utc.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant() -> Grant {
        Grant::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            vec!["openid".into()],
            "stamp".into(),
            "hash".into(),
            Duration::days(30),
        )
    }

    #[test]
    fn test_fresh_grant_is_active() {
        let g = grant();
        assert!(g.is_active_at(Utc::now()));
        assert!(!g.is_revoked());
    }

    #[test]
    fn test_expired_and_revoked() {
        let g = grant();
        assert!(!g.is_active_at(g.expiry_utc));

        let mut g = grant();
        g.revoked_utc = Some(Utc::now());
        assert!(!g.is_active_at(Utc::now()));
    }
}
