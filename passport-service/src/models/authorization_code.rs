//! Authorization code issued by the authorize step and redeemed at the token endpoint.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct AuthorizationCode {
    pub code_hash: String,
    pub client_id: String,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub scopes: Vec<String>,
    pub expiry_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl AuthorizationCode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        code_hash: String,
        client_id: String,
        tenant_id: Uuid,
        user_id: Uuid,
        redirect_uri: String,
        code_challenge: String,
        code_challenge_method: String,
        scopes: Vec<String>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            code_hash,
            client_id,
            tenant_id,
            user_id,
            redirect_uri,
            code_challenge,
            code_challenge_method,
            scopes,
            expiry_utc: now + ttl,
            consumed_utc: None,
            created_utc: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }
}
