//! Persistence seams.
//!
//! Services only see these traits. `PgStore` backs production, `MemoryStore`
//! backs tests and local runs without Postgres. OTP tickets live apart from
//! the row store in [`tickets`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    AuthorizationCode, Client, Grant, Role, Tenant, TokenKind, TrustedDevice, User,
    VerificationToken,
};
use crate::services::ServiceError;

mod memory;
mod postgres;
pub mod tickets;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use tickets::{MemoryTicketStore, OtpTicketStore, RedisTicketStore, TicketCheck};

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), ServiceError>;
    async fn find_tenant_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>, ServiceError>;
    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, ServiceError>;
    /// Case-insensitive exact match.
    async fn find_tenant_by_custom_domain(&self, domain: &str)
        -> Result<Option<Tenant>, ServiceError>;
    /// Case-insensitive exact match.
    async fn find_tenant_by_subdomain(&self, label: &str) -> Result<Option<Tenant>, ServiceError>;
    async fn list_tenants(&self) -> Result<Vec<Tenant>, ServiceError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert the user together with its role memberships.
    async fn insert_user(&self, user: &User, roles: &[Role]) -> Result<(), ServiceError>;
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError>;
    /// Username match is case-insensitive and scoped to the tenant.
    async fn find_user_by_username(
        &self,
        tenant_id: Uuid,
        username: &str,
    ) -> Result<Option<User>, ServiceError>;
    async fn find_user_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, ServiceError>;
    async fn list_users_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, ServiceError>;
    async fn find_roles(&self, user_id: Uuid) -> Result<Vec<Role>, ServiceError>;
    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        security_stamp: &str,
    ) -> Result<(), ServiceError>;
    /// Invitation acceptance: set the password, activate, confirm the email.
    async fn activate_with_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        security_stamp: &str,
    ) -> Result<(), ServiceError>;
    /// Replace the stamp, optionally recording a logout time. False when the
    /// user does not exist.
    async fn rotate_security_stamp(
        &self,
        user_id: Uuid,
        security_stamp: &str,
        logout_utc: Option<DateTime<Utc>>,
    ) -> Result<bool, ServiceError>;
    /// `Some(phone)` stores a confirmed phone, `None` clears it.
    async fn set_phone_two_factor(
        &self,
        user_id: Uuid,
        phone_number: Option<&str>,
        two_factor_enabled: bool,
        security_stamp: &str,
    ) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait TrustedDeviceRepository: Send + Sync {
    async fn insert_device(&self, device: &TrustedDevice) -> Result<(), ServiceError>;
    async fn find_device_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<TrustedDevice>, ServiceError>;
    async fn find_device(&self, device_id: Uuid) -> Result<Option<TrustedDevice>, ServiceError>;
    /// Unrevoked, unexpired devices, newest first.
    async fn list_active_devices(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrustedDevice>, ServiceError>;
    /// True when this call flipped the revoked flag.
    async fn revoke_device(&self, device_id: Uuid) -> Result<bool, ServiceError>;
    async fn revoke_devices_for_user(&self, user_id: Uuid) -> Result<u64, ServiceError>;
}

#[async_trait]
pub trait GrantRepository: Send + Sync {
    async fn insert_grant(&self, grant: &Grant) -> Result<(), ServiceError>;
    async fn find_grant(&self, grant_id: Uuid) -> Result<Option<Grant>, ServiceError>;
    /// Swap the refresh hash only if the stored one still equals
    /// `expected_hash` and the grant is live. Exactly one concurrent caller wins.
    async fn rotate_refresh_token(
        &self,
        grant_id: Uuid,
        expected_hash: &str,
        new_hash: &str,
        new_expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError>;
    async fn revoke_grant(&self, grant_id: Uuid, now: DateTime<Utc>) -> Result<bool, ServiceError>;
    /// Single conditional update over every unrevoked grant of the user.
    async fn revoke_grants_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;
}

#[async_trait]
pub trait AuthorizationCodeRepository: Send + Sync {
    async fn insert_authorization_code(&self, code: &AuthorizationCode)
        -> Result<(), ServiceError>;
    /// Mark the code consumed and return it. `None` if unknown or already used.
    /// Expired codes are still consumed and returned; the caller checks expiry.
    async fn consume_authorization_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, ServiceError>;
}

#[async_trait]
pub trait ClientRepository: Send + Sync {
    async fn insert_client(&self, client: &Client) -> Result<(), ServiceError>;
    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, ServiceError>;
}

#[async_trait]
pub trait VerificationTokenRepository: Send + Sync {
    async fn insert_verification_token(&self, token: &VerificationToken)
        -> Result<(), ServiceError>;
    /// Consume an unexpired, unconsumed token of `kind` for the user.
    async fn consume_verification_token(
        &self,
        user_id: Uuid,
        kind: TokenKind,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationToken>, ServiceError>;
}

/// Everything the service persists in the row store.
#[async_trait]
pub trait Store:
    TenantRepository
    + UserRepository
    + TrustedDeviceRepository
    + GrantRepository
    + AuthorizationCodeRepository
    + ClientRepository
    + VerificationTokenRepository
{
    async fn health_check(&self) -> Result<(), ServiceError>;

    /// Delete authorization codes and verification tokens consumed or expired
    /// before `cutoff`, plus grants revoked or expired before it. Returns the
    /// number of rows removed.
    async fn prune_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, ServiceError>;
}

/// Periodically delete rows that can no longer be redeemed, keeping
/// `retention` of history behind the cutoff.
pub fn spawn_pruner(
    store: Arc<dyn Store>,
    every: std::time::Duration,
    retention: chrono::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match store.prune_expired(Utc::now() - retention).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Pruned spent codes, tokens and grants"),
                Err(e) => tracing::warn!(error = %e, "Pruning spent rows failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_pruner_runs_in_background() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        let grant = Grant::new(
            Uuid::new_v4(),
            user_id,
            Uuid::new_v4(),
            None,
            vec![],
            "stamp".into(),
            "hash".into(),
            Duration::days(1),
        );
        store.insert_grant(&grant).await.unwrap();
        store
            .revoke_grant(grant.grant_id, Utc::now() - Duration::hours(2))
            .await
            .unwrap();

        let handle = spawn_pruner(
            store.clone(),
            std::time::Duration::from_millis(10),
            Duration::hours(1),
        );
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(store.grant_count(user_id), 0);
    }
}
