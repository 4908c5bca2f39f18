use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::TrustedDevice;
use crate::services::ServiceError;
use crate::store::Store;
use crate::utils::crypto::{random_hex, sha256_hex};

const DEVICE_TOKEN_BYTES: usize = 64;

/// Long-lived per-device tokens that stand in for the login OTP.
#[derive(Clone)]
pub struct TrustedDeviceRegistry {
    store: Arc<dyn Store>,
    expiry_days: i64,
}

impl TrustedDeviceRegistry {
    pub fn new(store: Arc<dyn Store>, expiry_days: i64) -> Self {
        Self { store, expiry_days }
    }

    /// Register a device and return its raw token. The token is shown once;
    /// only its SHA-256 is kept. `expiry_days` overrides the configured lifetime.
    pub async fn trust(
        &self,
        user_id: Uuid,
        label: &str,
        ip_address: Option<String>,
        expiry_days: Option<i64>,
    ) -> Result<String, ServiceError> {
        let raw_token = random_hex(DEVICE_TOKEN_BYTES);
        let label = if label.trim().is_empty() { "Unnamed device" } else { label.trim() };

        let device = TrustedDevice::new(
            user_id,
            sha256_hex(&raw_token),
            label.to_string(),
            ip_address,
            expiry_days.unwrap_or(self.expiry_days),
        );
        self.store.insert_device(&device).await?;

        tracing::info!(user_id = %user_id, device_id = %device.device_id, "Device trusted");
        Ok(raw_token)
    }

    async fn active_device(&self, raw_token: &str) -> Result<Option<TrustedDevice>, ServiceError> {
        if raw_token.is_empty() {
            return Ok(None);
        }
        Ok(self
            .store
            .find_device_by_hash(&sha256_hex(raw_token))
            .await?
            .filter(|d| d.is_active_at(Utc::now())))
    }

    /// Unknown, revoked and expired tokens are all just `false`.
    pub async fn is_trusted(&self, raw_token: &str) -> Result<bool, ServiceError> {
        Ok(self.active_device(raw_token).await?.is_some())
    }

    /// Like [`is_trusted`](Self::is_trusted) but the device must also belong to `user_id`.
    pub async fn is_trusted_for(&self, user_id: Uuid, raw_token: &str) -> Result<bool, ServiceError> {
        Ok(self
            .active_device(raw_token)
            .await?
            .is_some_and(|d| d.user_id == user_id))
    }

    pub async fn find(&self, device_id: Uuid) -> Result<Option<TrustedDevice>, ServiceError> {
        self.store.find_device(device_id).await
    }

    pub async fn list_active(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>, ServiceError> {
        self.store.list_active_devices(user_id, Utc::now()).await
    }

    /// Idempotent; revoking an unknown or already revoked device is not an error.
    pub async fn revoke(&self, device_id: Uuid) -> Result<(), ServiceError> {
        if self.store.revoke_device(device_id).await? {
            tracing::info!(device_id = %device_id, "Device revoked");
        }
        Ok(())
    }

    /// Self-service revoke. Someone else's device is reported as not found.
    pub async fn revoke_owned(&self, user_id: Uuid, device_id: Uuid) -> Result<(), ServiceError> {
        match self.store.find_device(device_id).await? {
            Some(device) if device.user_id == user_id => self.revoke(device_id).await,
            _ => Err(ServiceError::NotFound("Device")),
        }
    }

    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let count = self.store.revoke_devices_for_user(user_id).await?;
        tracing::info!(user_id = %user_id, count, "All devices revoked");
        Ok(count)
    }
}
