use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{user::new_security_stamp, Role, User};
use crate::services::ServiceError;
use crate::store::Store;
use crate::utils::password::{
    hash_password, meets_policy, verify_against_dummy, verify_password, Password,
    PasswordHashString, MIN_PASSWORD_LEN,
};

/// Username/password verification plus the per-user security stamp.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn Store>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Returns the user only when every check passes. Every failure looks the
    /// same to the caller.
    pub async fn verify(
        &self,
        tenant_id: Uuid,
        username: &str,
        password: &Password,
    ) -> Result<Option<User>, ServiceError> {
        let user = self.store.find_user_by_username(tenant_id, username).await?;

        let Some(user) = user else {
            verify_against_dummy(password);
            tracing::debug!("Credential check failed: unknown user");
            return Ok(None);
        };

        let Some(hash) = user.password_hash.clone() else {
            verify_against_dummy(password);
            tracing::debug!(user_id = %user.user_id, "Credential check failed: no password set");
            return Ok(None);
        };

        let password_ok = verify_password(password, &PasswordHashString::new(hash));

        if !password_ok || !user.is_active || user.tenant_id != tenant_id {
            tracing::debug!(user_id = %user.user_id, "Credential check failed");
            return Ok(None);
        }

        Ok(Some(user))
    }

    pub async fn roles_for(&self, user_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        self.store.find_roles(user_id).await
    }

    /// Replace the security stamp, which invalidates every grant bound to the
    /// old one. Returns the new stamp.
    pub async fn rotate_security_stamp(
        &self,
        user_id: Uuid,
        record_logout: bool,
    ) -> Result<String, ServiceError> {
        let stamp = new_security_stamp();
        let logout_utc = record_logout.then(Utc::now);

        if !self
            .store
            .rotate_security_stamp(user_id, &stamp, logout_utc)
            .await?
        {
            return Err(ServiceError::NotFound("User"));
        }

        tracing::info!(user_id = %user_id, record_logout, "Security stamp rotated");
        Ok(stamp)
    }

    /// Set a new password and rotate the stamp.
    pub async fn set_password(&self, user_id: Uuid, password: &Password) -> Result<(), ServiceError> {
        let hash = hash_for_storage(password)?;
        self.store
            .update_password(user_id, hash.as_str(), &new_security_stamp())
            .await?;

        tracing::info!(user_id = %user_id, "Password changed");
        Ok(())
    }
}

/// Enforce the password policy, then hash.
pub fn hash_for_storage(password: &Password) -> Result<PasswordHashString, ServiceError> {
    if !meets_policy(password.as_str()) {
        return Err(ServiceError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    hash_password(password).map_err(|e| {
        tracing::error!("Password hashing failed: {}", e);
        ServiceError::Internal(e)
    })
}
