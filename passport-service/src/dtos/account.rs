use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::utils::validation::validate_phone;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ForgotPasswordRequest {
    /// Tenant slug. Falls back to the request host.
    #[schema(example = "acme")]
    pub tenant: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "alice@acme.com")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResetPasswordRequest {
    pub user_id: Uuid,

    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    #[schema(min_length = 6)]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyEmailRequest {
    pub user_id: Uuid,

    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    #[schema(min_length = 6)]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SendLoginOtpRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyLoginOtpRequest {
    pub user_id: Uuid,

    #[validate(length(min = 1, message = "OTP is required"))]
    #[schema(example = "123456")]
    pub otp: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MfaTokenResponse {
    pub mfa_token: String,
    #[schema(example = 300)]
    pub expires_in: i64,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct EnablePhoneRequest {
    #[validate(custom(function = "validate_phone", message = "Phone number must be in E.164 format"))]
    #[schema(example = "+15551234567")]
    pub phone_number: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyPhoneRequest {
    #[validate(custom(function = "validate_phone", message = "Phone number must be in E.164 format"))]
    #[schema(example = "+15551234567")]
    pub phone_number: String,

    #[validate(length(min = 1, message = "OTP is required"))]
    #[schema(example = "123456")]
    pub otp: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OtpSentResponse {
    #[schema(example = "Verification code sent")]
    pub message: String,
    pub expires_in: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RevokedDevicesResponse {
    pub revoked: u64,
}
