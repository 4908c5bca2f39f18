//! Self-service account operations: profile, email verification, password
//! reset, phone two-factor enrollment.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    user::new_security_stamp, OtpPurpose, Tenant, TokenKind, UserProfile, VerificationToken,
};
use crate::services::{
    credentials::hash_for_storage, email::EmailProvider, otp::OtpChallenge, ServiceError,
};
use crate::store::Store;
use crate::utils::{
    crypto::{random_urlsafe, sha256_hex},
    validation::is_e164,
    Password,
};

const VERIFICATION_TOKEN_BYTES: usize = 32;

/// Persist a new emailed token and return its raw value.
pub async fn issue_verification_token(
    store: &dyn Store,
    user_id: Uuid,
    kind: TokenKind,
) -> Result<String, ServiceError> {
    let raw = random_urlsafe(VERIFICATION_TOKEN_BYTES);
    store
        .insert_verification_token(&VerificationToken::new(user_id, kind, sha256_hex(&raw)))
        .await?;
    Ok(raw)
}

#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn Store>,
    otp: OtpChallenge,
    email: Arc<dyn EmailProvider>,
    web_app_base_url: String,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn Store>,
        otp: OtpChallenge,
        email: Arc<dyn EmailProvider>,
        web_app_base_url: String,
    ) -> Self {
        Self {
            store,
            otp,
            email,
            web_app_base_url,
        }
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<UserProfile, ServiceError> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(ServiceError::NotFound("User"))?;
        let roles = self.store.find_roles(user_id).await?;
        Ok(UserProfile::new(user, roles))
    }

    /// Accept an invitation: consume the emailed token, set the password,
    /// activate the account and confirm the email.
    pub async fn verify_email_and_set_password(
        &self,
        user_id: Uuid,
        token: &str,
        password: &Password,
    ) -> Result<(), ServiceError> {
        // Policy first so a weak password does not burn the token.
        let hash = hash_for_storage(password)?;

        self.store
            .consume_verification_token(
                user_id,
                TokenKind::EmailVerification,
                &sha256_hex(token),
                Utc::now(),
            )
            .await?
            .ok_or_else(|| ServiceError::Validation("Invalid or expired token".to_string()))?;

        self.store
            .activate_with_password(user_id, hash.as_str(), &new_security_stamp())
            .await?;

        tracing::info!(user_id = %user_id, "Email verified and account activated");
        Ok(())
    }

    /// Always succeeds from the caller's point of view.
    pub async fn request_password_reset(&self, tenant: &Tenant, email: &str) -> Result<(), ServiceError> {
        let user = self
            .store
            .find_user_by_email(tenant.tenant_id, email.trim())
            .await?
            .filter(|u| u.is_active);

        let Some(user) = user else {
            tracing::debug!(tenant = %tenant.tenant_slug, "Password reset for unknown email");
            return Ok(());
        };

        let Some(to) = user.email.as_deref() else {
            return Ok(());
        };

        let token = issue_verification_token(self.store.as_ref(), user.user_id, TokenKind::PasswordReset).await?;

        if let Err(e) = self
            .email
            .send_password_reset_email(to, user.user_id, &token, &self.web_app_base_url)
            .await
        {
            tracing::error!(user_id = %user.user_id, error = %e, "Password reset email failed");
        } else {
            tracing::info!(user_id = %user.user_id, "Password reset email sent");
        }

        Ok(())
    }

    /// Consume a reset token and set the new password. The stamp rotates, so
    /// every outstanding token of the user stops working.
    pub async fn reset_password(
        &self,
        user_id: Uuid,
        token: &str,
        password: &Password,
    ) -> Result<(), ServiceError> {
        let hash = hash_for_storage(password)?;

        self.store
            .consume_verification_token(user_id, TokenKind::PasswordReset, &sha256_hex(token), Utc::now())
            .await?
            .ok_or_else(|| ServiceError::Validation("Invalid or expired token".to_string()))?;

        self.store
            .update_password(user_id, hash.as_str(), &new_security_stamp())
            .await?;

        tracing::info!(user_id = %user_id, "Password reset completed");
        Ok(())
    }

    /// Send an enrollment code to the phone the user wants to register.
    pub async fn begin_phone_enrollment(
        &self,
        user_id: Uuid,
        phone_number: &str,
    ) -> Result<Uuid, ServiceError> {
        if !is_e164(phone_number) {
            return Err(ServiceError::Validation(
                "Phone number must be in E.164 format".to_string(),
            ));
        }

        self.store
            .find_user_by_id(user_id)
            .await?
            .ok_or(ServiceError::NotFound("User"))?;

        self.otp.issue(user_id, OtpPurpose::PhoneEnroll, phone_number).await
    }

    /// Confirm the code. The phone must be the one the code was sent to.
    pub async fn confirm_phone_enrollment(
        &self,
        user_id: Uuid,
        phone_number: &str,
        code: &str,
    ) -> Result<(), ServiceError> {
        let ticket = self
            .otp
            .consume(user_id, OtpPurpose::PhoneEnroll, code)
            .await?
            .ok_or(ServiceError::InvalidOrExpiredOtp)?;

        if ticket.phone_number != phone_number {
            tracing::warn!(user_id = %user_id, "Enrollment code used for a different phone");
            return Err(ServiceError::InvalidOrExpiredOtp);
        }

        self.store
            .set_phone_two_factor(user_id, Some(phone_number), true, &new_security_stamp())
            .await?;

        tracing::info!(user_id = %user_id, "Phone two-factor enabled");
        Ok(())
    }

    pub async fn disable_two_factor(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.store
            .set_phone_two_factor(user_id, None, false, &new_security_stamp())
            .await?;

        tracing::info!(user_id = %user_id, "Two-factor disabled");
        Ok(())
    }
}
