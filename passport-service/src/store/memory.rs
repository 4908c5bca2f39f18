//! In-process row store used by tests and by local runs without Postgres.
//!
//! Each table is a `DashMap`; conditional updates run under the entry's shard
//! lock. Inserts that must respect a uniqueness rule take `insert_lock` first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};
use uuid::Uuid;

use super::{
    AuthorizationCodeRepository, ClientRepository, GrantRepository, Store, TenantRepository,
    TrustedDeviceRepository, UserRepository, VerificationTokenRepository,
};
use crate::models::{
    AuthorizationCode, Client, Grant, Role, Tenant, TokenKind, TrustedDevice, User,
    VerificationToken,
};
use crate::services::ServiceError;

#[derive(Default)]
pub struct MemoryStore {
    tenants: DashMap<Uuid, Tenant>,
    users: DashMap<Uuid, User>,
    roles: DashMap<Uuid, Vec<Role>>,
    devices: DashMap<Uuid, TrustedDevice>,
    grants: DashMap<Uuid, Grant>,
    codes: DashMap<String, AuthorizationCode>,
    clients: DashMap<String, Client>,
    verification_tokens: DashMap<Uuid, VerificationToken>,
    insert_lock: Mutex<()>,
    fail_device_inserts: AtomicBool,
}

fn eq_ignore_case(a: Option<&str>, b: &str) -> bool {
    a.map(|a| a.eq_ignore_ascii_case(b)).unwrap_or(false)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every trusted-device insert fail, to exercise the error paths.
    pub fn set_failing_device_inserts(&self, fail: bool) {
        self.fail_device_inserts.store(fail, Ordering::SeqCst);
    }

    /// Number of grants ever opened for the user, revoked or not.
    pub fn grant_count(&self, user_id: Uuid) -> usize {
        self.grants.iter().filter(|g| g.user_id == user_id).count()
    }

    /// Run `f` while holding the insert lock.
    fn locked<T>(&self, f: impl FnOnce() -> Result<T, ServiceError>) -> Result<T, ServiceError> {
        let _guard = self
            .insert_lock
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory store lock poisoned: {}", e))?;
        f()
    }

    fn insert_tenant_sync(&self, tenant: &Tenant) -> Result<(), ServiceError> {
        self.locked(|| {
            let clash = self.tenants.iter().any(|t| {
                t.tenant_slug == tenant.tenant_slug
                    || tenant
                        .custom_domain
                        .as_deref()
                        .is_some_and(|d| eq_ignore_case(t.custom_domain.as_deref(), d))
                    || tenant
                        .subdomain_slug
                        .as_deref()
                        .is_some_and(|s| eq_ignore_case(t.subdomain_slug.as_deref(), s))
            });
            if clash {
                return Err(ServiceError::Conflict("Tenant already exists".to_string()));
            }
            self.tenants.insert(tenant.tenant_id, tenant.clone());
            Ok(())
        })
    }

    fn insert_user_sync(&self, user: &User, roles: &[Role]) -> Result<(), ServiceError> {
        self.locked(|| {
            let clash = self.users.iter().any(|u| {
                u.tenant_id == user.tenant_id
                    && (u.username.eq_ignore_ascii_case(&user.username)
                        || user
                            .email
                            .as_deref()
                            .is_some_and(|e| eq_ignore_case(u.email.as_deref(), e)))
            });
            if clash {
                return Err(ServiceError::Conflict("User already exists".to_string()));
            }
            let mut roles = roles.to_vec();
            roles.sort_by_key(|r| r.as_str());
            roles.dedup();
            self.users.insert(user.user_id, user.clone());
            self.roles.insert(user.user_id, roles);
            Ok(())
        })
    }

    fn insert_device_sync(&self, device: &TrustedDevice) -> Result<(), ServiceError> {
        self.locked(|| {
            if self.devices.iter().any(|d| d.token_hash == device.token_hash) {
                return Err(ServiceError::Conflict("Device already exists".to_string()));
            }
            self.devices.insert(device.device_id, device.clone());
            Ok(())
        })
    }

    fn find_tenant_where(&self, pred: impl Fn(&Tenant) -> bool) -> Option<Tenant> {
        self.tenants
            .iter()
            .find(|t| pred(t.value()))
            .map(|t| t.value().clone())
    }

    fn find_user_where(&self, pred: impl Fn(&User) -> bool) -> Option<User> {
        self.users
            .iter()
            .find(|u| pred(u.value()))
            .map(|u| u.value().clone())
    }
}

#[async_trait]
impl TenantRepository for MemoryStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), ServiceError> {
        self.insert_tenant_sync(tenant)
    }

    async fn find_tenant_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>, ServiceError> {
        Ok(self.tenants.get(&tenant_id).map(|t| t.value().clone()))
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, ServiceError> {
        Ok(self.find_tenant_where(|t| t.tenant_slug == slug))
    }

    async fn find_tenant_by_custom_domain(
        &self,
        domain: &str,
    ) -> Result<Option<Tenant>, ServiceError> {
        Ok(self.find_tenant_where(|t| eq_ignore_case(t.custom_domain.as_deref(), domain)))
    }

    async fn find_tenant_by_subdomain(&self, label: &str) -> Result<Option<Tenant>, ServiceError> {
        Ok(self.find_tenant_where(|t| eq_ignore_case(t.subdomain_slug.as_deref(), label)))
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, ServiceError> {
        let mut tenants: Vec<Tenant> = self.tenants.iter().map(|t| t.value().clone()).collect();
        tenants.sort_by(|a, b| a.tenant_slug.cmp(&b.tenant_slug));
        Ok(tenants)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn insert_user(&self, user: &User, roles: &[Role]) -> Result<(), ServiceError> {
        self.insert_user_sync(user, roles)
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(self.users.get(&user_id).map(|u| u.value().clone()))
    }

    async fn find_user_by_username(
        &self,
        tenant_id: Uuid,
        username: &str,
    ) -> Result<Option<User>, ServiceError> {
        Ok(self.find_user_where(|u| {
            u.tenant_id == tenant_id && u.username.eq_ignore_ascii_case(username)
        }))
    }

    async fn find_user_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, ServiceError> {
        Ok(self.find_user_where(|u| {
            u.tenant_id == tenant_id && eq_ignore_case(u.email.as_deref(), email)
        }))
    }

    async fn list_users_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, ServiceError> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|u| u.tenant_id == tenant_id)
            .map(|u| u.value().clone())
            .collect();
        users.sort_by_key(|u| u.created_utc);
        Ok(users)
    }

    async fn find_roles(&self, user_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        Ok(self
            .roles
            .get(&user_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        security_stamp: &str,
    ) -> Result<(), ServiceError> {
        if let Some(mut user) = self.users.get_mut(&user_id) {
            user.password_hash = Some(password_hash.to_string());
            user.security_stamp = security_stamp.to_string();
        }
        Ok(())
    }

    async fn activate_with_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        security_stamp: &str,
    ) -> Result<(), ServiceError> {
        if let Some(mut user) = self.users.get_mut(&user_id) {
            user.password_hash = Some(password_hash.to_string());
            user.security_stamp = security_stamp.to_string();
            user.is_active = true;
            user.email_confirmed = true;
        }
        Ok(())
    }

    async fn rotate_security_stamp(
        &self,
        user_id: Uuid,
        security_stamp: &str,
        logout_utc: Option<DateTime<Utc>>,
    ) -> Result<bool, ServiceError> {
        match self.users.get_mut(&user_id) {
            Some(mut user) => {
                user.security_stamp = security_stamp.to_string();
                if logout_utc.is_some() {
                    user.last_logout_utc = logout_utc;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_phone_two_factor(
        &self,
        user_id: Uuid,
        phone_number: Option<&str>,
        two_factor_enabled: bool,
        security_stamp: &str,
    ) -> Result<(), ServiceError> {
        if let Some(mut user) = self.users.get_mut(&user_id) {
            user.phone_number = phone_number.map(str::to_string);
            user.phone_confirmed = phone_number.is_some();
            user.two_factor_enabled = two_factor_enabled;
            user.security_stamp = security_stamp.to_string();
        }
        Ok(())
    }
}

#[async_trait]
impl TrustedDeviceRepository for MemoryStore {
    async fn insert_device(&self, device: &TrustedDevice) -> Result<(), ServiceError> {
        if self.fail_device_inserts.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("device table unavailable").into());
        }
        self.insert_device_sync(device)
    }

    async fn find_device_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<TrustedDevice>, ServiceError> {
        Ok(self
            .devices
            .iter()
            .find(|d| d.token_hash == token_hash)
            .map(|d| d.value().clone()))
    }

    async fn find_device(&self, device_id: Uuid) -> Result<Option<TrustedDevice>, ServiceError> {
        Ok(self.devices.get(&device_id).map(|d| d.value().clone()))
    }

    async fn list_active_devices(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrustedDevice>, ServiceError> {
        let mut devices: Vec<TrustedDevice> = self
            .devices
            .iter()
            .filter(|d| d.user_id == user_id && d.is_active_at(now))
            .map(|d| d.value().clone())
            .collect();
        devices.sort_by(|a, b| b.trusted_utc.cmp(&a.trusted_utc));
        Ok(devices)
    }

    async fn revoke_device(&self, device_id: Uuid) -> Result<bool, ServiceError> {
        match self.devices.get_mut(&device_id) {
            Some(mut device) if !device.is_revoked => {
                device.is_revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_devices_for_user(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let mut count = 0;
        for mut device in self.devices.iter_mut() {
            if device.user_id == user_id && !device.is_revoked {
                device.is_revoked = true;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl GrantRepository for MemoryStore {
    async fn insert_grant(&self, grant: &Grant) -> Result<(), ServiceError> {
        self.grants.insert(grant.grant_id, grant.clone());
        Ok(())
    }

    async fn find_grant(&self, grant_id: Uuid) -> Result<Option<Grant>, ServiceError> {
        Ok(self.grants.get(&grant_id).map(|g| g.value().clone()))
    }

    async fn rotate_refresh_token(
        &self,
        grant_id: Uuid,
        expected_hash: &str,
        new_hash: &str,
        new_expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        match self.grants.get_mut(&grant_id) {
            Some(mut grant)
                if grant.refresh_token_hash == expected_hash && grant.is_active_at(now) =>
            {
                grant.refresh_token_hash = new_hash.to_string();
                grant.expiry_utc = new_expiry;
                grant.rotated_utc = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_grant(&self, grant_id: Uuid, now: DateTime<Utc>) -> Result<bool, ServiceError> {
        match self.grants.get_mut(&grant_id) {
            Some(mut grant) if grant.revoked_utc.is_none() => {
                grant.revoked_utc = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_grants_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let mut count = 0;
        for mut grant in self.grants.iter_mut() {
            if grant.user_id == user_id && grant.revoked_utc.is_none() {
                grant.revoked_utc = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl AuthorizationCodeRepository for MemoryStore {
    async fn insert_authorization_code(
        &self,
        code: &AuthorizationCode,
    ) -> Result<(), ServiceError> {
        self.codes.insert(code.code_hash.clone(), code.clone());
        Ok(())
    }

    async fn consume_authorization_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, ServiceError> {
        match self.codes.get_mut(code_hash) {
            Some(mut code) if code.consumed_utc.is_none() => {
                code.consumed_utc = Some(now);
                Ok(Some(code.value().clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ClientRepository for MemoryStore {
    async fn insert_client(&self, client: &Client) -> Result<(), ServiceError> {
        match self.clients.entry(client.client_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(ServiceError::Conflict("Client already exists".to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(client.clone());
                Ok(())
            }
        }
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, ServiceError> {
        Ok(self.clients.get(client_id).map(|c| c.value().clone()))
    }
}

#[async_trait]
impl VerificationTokenRepository for MemoryStore {
    async fn insert_verification_token(
        &self,
        token: &VerificationToken,
    ) -> Result<(), ServiceError> {
        self.verification_tokens.insert(token.token_id, token.clone());
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        user_id: Uuid,
        kind: TokenKind,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationToken>, ServiceError> {
        for mut token in self.verification_tokens.iter_mut() {
            if token.user_id == user_id
                && token.is_kind(kind)
                && token.token_hash == token_hash
                && token.is_usable_at(now)
            {
                token.consumed_utc = Some(now);
                return Ok(Some(token.value().clone()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn prune_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, ServiceError> {
        let before = self.codes.len() + self.verification_tokens.len() + self.grants.len();
        let spent = |consumed: Option<DateTime<Utc>>, expiry: DateTime<Utc>| {
            consumed.is_some_and(|c| c < cutoff) || expiry < cutoff
        };
        self.codes.retain(|_, c| !spent(c.consumed_utc, c.expiry_utc));
        self.verification_tokens
            .retain(|_, t| !spent(t.consumed_utc, t.expiry_utc));
        self.grants.retain(|_, g| !spent(g.revoked_utc, g.expiry_utc));
        let after = self.codes.len() + self.verification_tokens.len() + self.grants.len();
        Ok(before.saturating_sub(after) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant(user_id: Uuid, hash: &str) -> Grant {
        Grant::new(
            Uuid::new_v4(),
            user_id,
            Uuid::new_v4(),
            None,
            vec![],
            "stamp".into(),
            hash.into(),
            Duration::days(1),
        )
    }

    #[tokio::test]
    async fn test_rotation_is_conditional_on_current_hash() {
        let store = MemoryStore::new();
        let g = grant(Uuid::new_v4(), "h1");
        store.insert_grant(&g).await.unwrap();

        let now = Utc::now();
        let expiry = now + Duration::days(1);
        assert!(store.rotate_refresh_token(g.grant_id, "h1", "h2", expiry, now).await.unwrap());
        assert!(!store.rotate_refresh_token(g.grant_id, "h1", "h3", expiry, now).await.unwrap());
        assert!(store.rotate_refresh_token(g.grant_id, "h2", "h3", expiry, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_all_counts_only_live_grants() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let first = grant(user_id, "a");
        store.insert_grant(&first).await.unwrap();
        store.insert_grant(&grant(user_id, "b")).await.unwrap();
        store.insert_grant(&grant(Uuid::new_v4(), "c")).await.unwrap();

        store.revoke_grant(first.grant_id, Utc::now()).await.unwrap();
        assert_eq!(store.revoke_grants_for_user(user_id, Utc::now()).await.unwrap(), 1);
        assert_eq!(store.revoke_grants_for_user(user_id, Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_usernames_unique_per_tenant_ignoring_case() {
        let store = MemoryStore::new();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();

        store
            .insert_user(&User::new(tenant_a, "Alice".into(), None), &[Role::User])
            .await
            .unwrap();
        let dup = store
            .insert_user(&User::new(tenant_a, "alice".into(), None), &[Role::User])
            .await;
        assert!(matches!(dup, Err(ServiceError::Conflict(_))));

        store
            .insert_user(&User::new(tenant_b, "alice".into(), None), &[Role::User])
            .await
            .unwrap();
        assert!(store.find_user_by_username(tenant_a, "ALICE").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_code_consumed_once() {
        let store = MemoryStore::new();
        let code = AuthorizationCode::new(
            "hash".into(),
            "client".into(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "https://app/cb".into(),
            "challenge".into(),
            "S256".into(),
            vec![],
            Duration::seconds(60),
        );
        store.insert_authorization_code(&code).await.unwrap();

        assert!(store.consume_authorization_code("hash", Utc::now()).await.unwrap().is_some());
        assert!(store.consume_authorization_code("hash", Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_drops_only_spent_rows() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let user_id = Uuid::new_v4();

        let code = |hash: &str, ttl: Duration| {
            AuthorizationCode::new(
                hash.into(),
                "portal".into(),
                Uuid::new_v4(),
                user_id,
                "https://portal/cb".into(),
                "challenge".into(),
                "S256".into(),
                vec![],
                ttl,
            )
        };
        store.insert_authorization_code(&code("stale", Duration::days(-2))).await.unwrap();
        store.insert_authorization_code(&code("fresh", Duration::minutes(5))).await.unwrap();

        let revoked = grant(user_id, "old");
        store.insert_grant(&revoked).await.unwrap();
        store.revoke_grant(revoked.grant_id, now - Duration::days(2)).await.unwrap();
        let live = grant(user_id, "live");
        store.insert_grant(&live).await.unwrap();

        let mut token = VerificationToken::new(user_id, TokenKind::PasswordReset, "t".into());
        token.expiry_utc = now - Duration::days(3);
        store.insert_verification_token(&token).await.unwrap();

        assert_eq!(store.prune_expired(now - Duration::days(1)).await.unwrap(), 3);
        assert!(store.codes.contains_key("fresh"));
        assert!(!store.codes.contains_key("stale"));
        assert!(store.grants.contains_key(&live.grant_id));
        assert_eq!(store.grant_count(user_id), 1);
        assert!(store.verification_tokens.is_empty());

        assert_eq!(store.prune_expired(now - Duration::days(1)).await.unwrap(), 0);
    }
}
