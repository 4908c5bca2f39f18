use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::{
    credentials::CredentialStore, token_authority::TokenAuthority,
    trusted_devices::TrustedDeviceRegistry,
};

/// Which force-logout steps completed. `None` counts mean the step failed.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ForceLogoutReport {
    pub user_id: Uuid,
    pub grants_revoked: Option<u64>,
    pub security_stamp_rotated: bool,
    pub devices_revoked: Option<u64>,
}

impl ForceLogoutReport {
    pub fn is_complete(&self) -> bool {
        self.grants_revoked.is_some() && self.security_stamp_rotated && self.devices_revoked.is_some()
    }
}

/// Fans a forced logout out to grants, the security stamp and devices.
#[derive(Clone)]
pub struct SessionRevocationService {
    tokens: TokenAuthority,
    credentials: CredentialStore,
    devices: TrustedDeviceRegistry,
}

impl SessionRevocationService {
    pub fn new(
        tokens: TokenAuthority,
        credentials: CredentialStore,
        devices: TrustedDeviceRegistry,
    ) -> Self {
        Self {
            tokens,
            credentials,
            devices,
        }
    }

    /// Runs every step even if an earlier one fails.
    pub async fn force_logout(&self, user_id: Uuid) -> ForceLogoutReport {
        let grants_revoked = match self.tokens.revoke_all(user_id).await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::error!(user_id = %user_id, step = "revoke_grants", error = %e, "Force logout step failed");
                None
            }
        };

        let security_stamp_rotated = match self.credentials.rotate_security_stamp(user_id, true).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(user_id = %user_id, step = "rotate_security_stamp", error = %e, "Force logout step failed");
                false
            }
        };

        let devices_revoked = match self.devices.revoke_all(user_id).await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::error!(user_id = %user_id, step = "revoke_devices", error = %e, "Force logout step failed");
                None
            }
        };

        let report = ForceLogoutReport {
            user_id,
            grants_revoked,
            security_stamp_rotated,
            devices_revoked,
        };

        tracing::info!(
            user_id = %user_id,
            complete = report.is_complete(),
            grants = ?report.grants_revoked,
            devices = ?report.devices_revoked,
            "Force logout finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::jwt::JwtService;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn service() -> SessionRevocationService {
        let store = Arc::new(MemoryStore::new());
        let jwt = Arc::new(
            JwtService::from_pem(
                include_str!("../../tests/fixtures/jwt_private.pem"),
                include_str!("../../tests/fixtures/jwt_public.pem"),
                "passport-test",
                60,
                30,
            )
            .unwrap(),
        );
        SessionRevocationService::new(
            TokenAuthority::new(store.clone(), jwt, 60),
            CredentialStore::new(store.clone()),
            TrustedDeviceRegistry::new(store, 30),
        )
    }

    #[tokio::test]
    async fn test_failed_step_does_not_stop_the_rest() {
        // Unknown user: stamp rotation fails, the revocations still run.
        let report = service().force_logout(Uuid::new_v4()).await;

        assert_eq!(report.grants_revoked, Some(0));
        assert!(!report.security_stamp_rotated);
        assert_eq!(report.devices_revoked, Some(0));
        assert!(!report.is_complete());
    }
}
