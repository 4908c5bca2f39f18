use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;

use crate::{
    dtos::{
        account::{
            EnablePhoneRequest, ForgotPasswordRequest, MfaTokenResponse, OtpSentResponse,
            ResetPasswordRequest, SendLoginOtpRequest, VerifyEmailRequest, VerifyLoginOtpRequest,
            VerifyPhoneRequest,
        },
        ErrorResponse, MessageResponse,
    },
    handlers::request_host,
    middleware::AuthUser,
    models::{OtpPurpose, UserProfile},
    services::jwt::MFA_TOKEN_MINUTES,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Request a password reset email
///
/// Always answers 200 so callers cannot enumerate accounts.
#[utoipa::path(
    post,
    path = "/account/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset email sent if the account exists", body = MessageResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Account"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state
        .tenants
        .resolve(req.tenant.as_deref(), request_host(&headers))
        .await;

    match tenant {
        Ok(Some(tenant)) => {
            if let Err(e) = state.accounts.request_password_reset(&tenant, &req.email).await {
                tracing::error!(error = %e, tenant = %tenant.tenant_slug, "Password reset request failed");
            }
        }
        Ok(None) => tracing::debug!("Password reset for unknown tenant"),
        Err(e) => tracing::error!(error = %e, "Tenant lookup failed during password reset"),
    }

    Ok((
        StatusCode::OK,
        Json(MessageResponse::new(
            "If an account exists for this email, a reset link has been sent",
        )),
    ))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/account/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Account"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .accounts
        .reset_password(req.user_id, &req.token, &Password::new(req.new_password))
        .await?;

    Ok((StatusCode::OK, Json(MessageResponse::new("Password has been reset"))))
}

/// Accept an invitation: verify the email and choose a password
#[utoipa::path(
    post,
    path = "/account/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Account activated", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Account"
)]
pub async fn verify_email(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyEmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .accounts
        .verify_email_and_set_password(req.user_id, &req.token, &Password::new(req.password))
        .await?;

    Ok((StatusCode::OK, Json(MessageResponse::new("Email verified, account activated"))))
}

/// Send a login code to the user's confirmed phone
#[utoipa::path(
    post,
    path = "/account/two-factor/send-login-otp",
    request_body = SendLoginOtpRequest,
    responses(
        (status = 200, description = "Code sent if the user is enrolled", body = MessageResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse),
        (status = 503, description = "SMS delivery failed", body = ErrorResponse)
    ),
    tag = "Two-Factor"
)]
pub async fn send_login_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SendLoginOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.login.send_login_otp(req.user_id).await?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("If two-factor is enabled, a code has been sent")),
    ))
}

/// Trade a login code for a short-lived MFA token
#[utoipa::path(
    post,
    path = "/account/two-factor/verify-login-otp",
    request_body = VerifyLoginOtpRequest,
    responses(
        (status = 200, description = "Code accepted", body = MfaTokenResponse),
        (status = 400, description = "Invalid or expired OTP", body = ErrorResponse)
    ),
    tag = "Two-Factor"
)]
pub async fn verify_login_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyLoginOtpRequest>,
) -> Result<Json<MfaTokenResponse>, AppError> {
    let mfa_token = state.login.verify_login_otp(req.user_id, &req.otp).await?;
    Ok(Json(MfaTokenResponse {
        mfa_token,
        expires_in: MFA_TOKEN_MINUTES * 60,
    }))
}

/// Current user's profile
#[utoipa::path(
    get,
    path = "/account/profile",
    responses(
        (status = 200, description = "Profile", body = UserProfile),
        (status = 401, description = "Invalid or revoked token", body = ErrorResponse)
    ),
    tag = "Account",
    security(("bearer_auth" = []))
)]
pub async fn profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<UserProfile>, AppError> {
    Ok(Json(state.accounts.profile(user.user_id()).await?))
}

/// Start phone enrollment by texting a code
#[utoipa::path(
    post,
    path = "/account/two-factor/enable-phone",
    request_body = EnablePhoneRequest,
    responses(
        (status = 200, description = "Code sent", body = OtpSentResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 503, description = "SMS delivery failed", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn enable_phone(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<EnablePhoneRequest>,
) -> Result<Json<OtpSentResponse>, AppError> {
    state
        .accounts
        .begin_phone_enrollment(user.user_id(), &req.phone_number)
        .await?;

    Ok(Json(OtpSentResponse {
        message: "Verification code sent".to_string(),
        expires_in: OtpPurpose::PhoneEnroll.ttl().num_seconds(),
    }))
}

/// Confirm the enrollment code and turn two-factor on
///
/// Rotates the security stamp, so the token used for this call stops working.
#[utoipa::path(
    post,
    path = "/account/two-factor/verify-phone",
    request_body = VerifyPhoneRequest,
    responses(
        (status = 200, description = "Two-factor enabled", body = MessageResponse),
        (status = 400, description = "Invalid or expired OTP", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn verify_phone(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<VerifyPhoneRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .accounts
        .confirm_phone_enrollment(user.user_id(), &req.phone_number, &req.otp)
        .await?;

    Ok((StatusCode::OK, Json(MessageResponse::new("Two-factor authentication enabled"))))
}

/// Turn two-factor off
#[utoipa::path(
    post,
    path = "/account/two-factor/disable",
    responses(
        (status = 200, description = "Two-factor disabled", body = MessageResponse),
        (status = 401, description = "Invalid or revoked token", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn disable_two_factor(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    state.accounts.disable_two_factor(user.user_id()).await?;
    Ok((StatusCode::OK, Json(MessageResponse::new("Two-factor authentication disabled"))))
}
