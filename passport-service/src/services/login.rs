//! Interactive login: credentials plus, for two-factor users, one of a trusted
//! device, a login OTP or an MFA token from verify-login-otp.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{OtpPurpose, Tenant, User};
use crate::services::{
    credentials::CredentialStore, jwt::JwtService, otp::OtpChallenge,
    trusted_devices::TrustedDeviceRegistry, ServiceError,
};
use crate::store::Store;
use crate::utils::crypto::{constant_time_eq, sha256_hex};
use crate::utils::Password;

/// Second-factor material presented alongside the password.
#[derive(Debug, Default, Clone, Copy)]
pub struct SecondFactor<'a> {
    pub otp: Option<&'a str>,
    pub mfa_token: Option<&'a str>,
    pub device_token: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatisfiedBy {
    NotRequired,
    TrustedDevice,
    Otp,
    MfaToken,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub satisfied_by: SatisfiedBy,
}

#[derive(Clone)]
pub struct LoginService {
    store: Arc<dyn Store>,
    jwt: Arc<JwtService>,
    credentials: CredentialStore,
    otp: OtpChallenge,
    devices: TrustedDeviceRegistry,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl LoginService {
    pub fn new(
        store: Arc<dyn Store>,
        jwt: Arc<JwtService>,
        credentials: CredentialStore,
        otp: OtpChallenge,
        devices: TrustedDeviceRegistry,
    ) -> Self {
        Self {
            store,
            jwt,
            credentials,
            otp,
            devices,
        }
    }

    pub async fn authenticate(
        &self,
        tenant: &Tenant,
        username: &str,
        password: &Password,
        factor: SecondFactor<'_>,
    ) -> Result<LoginOutcome, ServiceError> {
        if !tenant.is_active {
            return Err(ServiceError::InactiveTenant);
        }

        let user = self
            .credentials
            .verify(tenant.tenant_id, username, password)
            .await?
            .ok_or_else(|| {
                tracing::warn!(tenant = %tenant.tenant_slug, "Login failed");
                ServiceError::InvalidCredentials
            })?;

        let satisfied_by = self.check_second_factor(&user, factor).await?;

        tracing::info!(
            user_id = %user.user_id,
            tenant = %tenant.tenant_slug,
            second_factor = ?satisfied_by,
            "Login succeeded"
        );
        Ok(LoginOutcome { user, satisfied_by })
    }

    async fn check_second_factor(
        &self,
        user: &User,
        factor: SecondFactor<'_>,
    ) -> Result<SatisfiedBy, ServiceError> {
        if !user.two_factor_enabled {
            return Ok(SatisfiedBy::NotRequired);
        }

        // A stale device token falls through to the other factors.
        if let Some(device_token) = present(factor.device_token) {
            if self.devices.is_trusted_for(user.user_id, device_token).await? {
                return Ok(SatisfiedBy::TrustedDevice);
            }
        }

        if let Some(mfa_token) = present(factor.mfa_token) {
            return self.redeem_mfa_token(user, mfa_token).await;
        }

        if let Some(code) = present(factor.otp) {
            return if self.otp.verify(user.user_id, OtpPurpose::Login, code).await? {
                Ok(SatisfiedBy::Otp)
            } else {
                Err(ServiceError::InvalidOrExpiredOtp)
            };
        }

        match user.confirmed_phone() {
            Some(phone) => {
                self.otp.issue(user.user_id, OtpPurpose::Login, phone).await?;
            }
            None => {
                tracing::error!(user_id = %user.user_id, "Two-factor enabled without a confirmed phone");
            }
        }

        Err(ServiceError::SecondFactorRequired {
            user_id: user.user_id,
        })
    }

    /// Accept an MFA token once, for the user it was minted for, and only
    /// while their security stamp is the one it was minted under.
    async fn redeem_mfa_token(&self, user: &User, mfa_token: &str) -> Result<SatisfiedBy, ServiceError> {
        let claims = self
            .jwt
            .validate_mfa_token(mfa_token)
            .map_err(|_| ServiceError::InvalidOrExpiredOtp)?;

        let bound = claims.sub == user.user_id.to_string()
            && claims.tenant_id == user.tenant_id.to_string()
            && constant_time_eq(&claims.stamp, &sha256_hex(&user.security_stamp));
        if !bound {
            tracing::warn!(user_id = %user.user_id, "MFA token rejected");
            return Err(ServiceError::InvalidOrExpiredOtp);
        }

        let ttl = claims.exp - Utc::now().timestamp();
        if !self.otp.redeem_once(&claims.jti, ttl).await? {
            tracing::warn!(user_id = %user.user_id, "MFA token replayed");
            return Err(ServiceError::InvalidOrExpiredOtp);
        }

        Ok(SatisfiedBy::MfaToken)
    }

    pub async fn remember_device(
        &self,
        user_id: Uuid,
        label: Option<&str>,
        ip_address: Option<String>,
    ) -> Result<String, ServiceError> {
        self.devices
            .trust(user_id, label.unwrap_or_default(), ip_address, None)
            .await
    }

    /// Re-send a login code. Silent for users that cannot receive one.
    pub async fn send_login_otp(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let user = self.store.find_user_by_id(user_id).await?;

        match user.as_ref().filter(|u| u.is_active && u.two_factor_enabled) {
            Some(user) => match user.confirmed_phone() {
                Some(phone) => {
                    self.otp.issue(user.user_id, OtpPurpose::Login, phone).await?;
                }
                None => tracing::debug!(user_id = %user_id, "No confirmed phone for login OTP"),
            },
            None => tracing::debug!(user_id = %user_id, "Login OTP requested for ineligible user"),
        }

        Ok(())
    }

    /// Trade a login code for a short-lived MFA token.
    pub async fn verify_login_otp(&self, user_id: Uuid, code: &str) -> Result<String, ServiceError> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or(ServiceError::InvalidOrExpiredOtp)?;

        if !self.otp.verify(user.user_id, OtpPurpose::Login, code).await? {
            return Err(ServiceError::InvalidOrExpiredOtp);
        }

        Ok(self.jwt.generate_mfa_token(&user)?)
    }
}
