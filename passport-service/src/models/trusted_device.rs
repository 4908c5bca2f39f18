//! Trusted device model. Only the hash of the device secret is kept.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

pub const DEFAULT_TRUST_DAYS: i64 = 30;

#[derive(Debug, Clone, FromRow)]
pub struct TrustedDevice {
    pub device_id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub device_label: String,
    pub ip_address: Option<String>,
    pub trusted_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub is_revoked: bool,
}

impl TrustedDevice {
    pub fn new(
        user_id: Uuid,
        token_hash: String,
        device_label: String,
        ip_address: Option<String>,
        expiry_days: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            device_id: Uuid::new_v4(),
            user_id,
            token_hash,
            device_label,
            ip_address,
            trusted_utc: now,
            expiry_utc: now + Duration::days(expiry_days),
            is_revoked: false,
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && self.expiry_utc > now
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }
}

/// Device info for API responses.
#[derive(Debug, Serialize, ToSchema)]
pub struct DeviceInfo {
    pub device_id: Uuid,
    pub device_label: String,
    pub ip_address: Option<String>,
    pub trusted_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
}

impl From<TrustedDevice> for DeviceInfo {
    fn from(d: TrustedDevice) -> Self {
        Self {
            device_id: d.device_id,
            device_label: d.device_label,
            ip_address: d.ip_address,
            trusted_utc: d.trusted_utc,
            expiry_utc: d.expiry_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> TrustedDevice {
        TrustedDevice::new(Uuid::new_v4(), "h".repeat(64), "laptop".into(), None, 30)
    }

    #[test]
    fn test_new_device_is_active() {
        let d = device();
        assert!(d.is_active());
        assert_eq!((d.expiry_utc - d.trusted_utc).num_days(), 30);
    }

    #[test]
    fn test_revoked_or_expired_is_inactive() {
        let mut d = device();
        d.is_revoked = true;
        assert!(!d.is_active());

        let mut d = device();
        d.expiry_utc = Utc::now() - Duration::seconds(1);
        assert!(!d.is_active());
    }
}
