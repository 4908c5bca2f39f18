use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use service_core::error::AppError;
use std::net::SocketAddr;

use crate::{
    dtos::{
        token::{AuthorizeForm, IntrospectRequest, IntrospectResponse, TokenRequest, TokenResponse},
        ErrorResponse, MessageResponse,
    },
    handlers::{caller_ip, required, resolve_login_tenant},
    middleware::AuthUser,
    services::{
        login::{SatisfiedBy, SecondFactor},
        token_authority::{parse_scopes, AuthorizeRequest},
        ServiceError,
    },
    utils::{Password, ValidatedForm},
    AppState,
};

pub const DEVICE_COOKIE: &str = "passport_device";

/// Exchange credentials, a refresh token or an authorization code for tokens
#[utoipa::path(
    post,
    path = "/connect/token",
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Invalid grant or request", body = ErrorResponse),
        (status = 401, description = "Invalid credentials, revoked token or second factor required", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Connect"
)]
pub async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    ValidatedForm(req): ValidatedForm<TokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = match req.grant_type.as_str() {
        "password" => password_grant(&state, &headers, connect.as_ref(), &req).await?,
        "refresh_token" => {
            let refresh_token = required(req.refresh_token.as_deref(), "refresh_token")?;
            TokenResponse::new(state.tokens.refresh(refresh_token).await?, None)
        }
        "authorization_code" => {
            let tokens = state
                .tokens
                .exchange_code(
                    required(req.code.as_deref(), "code")?,
                    required(req.code_verifier.as_deref(), "code_verifier")?,
                    required(req.client_id.as_deref(), "client_id")?,
                    required(req.redirect_uri.as_deref(), "redirect_uri")?,
                )
                .await?;
            TokenResponse::new(tokens, None)
        }
        other => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "unsupported_grant_type: {}",
                other
            )))
        }
    };

    Ok((
        [(header::CACHE_CONTROL, "no-store"), (header::PRAGMA, "no-cache")],
        Json(response),
    ))
}

async fn password_grant(
    state: &AppState,
    headers: &HeaderMap,
    connect: Option<&ConnectInfo<SocketAddr>>,
    req: &TokenRequest,
) -> Result<TokenResponse, AppError> {
    let username = required(req.username.as_deref(), "username")?;
    let password = Password::new(required(req.password.as_deref(), "password")?.to_string());
    let scopes = parse_scopes(req.scope.as_deref())?;

    let client_id = req.client_id.as_deref().map(str::trim).filter(|c| !c.is_empty());
    if let Some(client_id) = client_id {
        state
            .store
            .find_client(client_id)
            .await?
            .ok_or_else(|| ServiceError::invalid_grant("unknown client"))?;
    }

    let tenant = resolve_login_tenant(state, req.tenant.as_deref(), headers).await?;
    let outcome = state
        .login
        .authenticate(&tenant, username, &password, req.second_factor())
        .await?;

    // Trust the device first so a failure cannot leave behind a grant whose
    // tokens the caller never received.
    let device_token = if req.remember_device && remembers(outcome.satisfied_by) {
        Some(
            state
                .login
                .remember_device(
                    outcome.user.user_id,
                    req.device_label.as_deref(),
                    caller_ip(headers, connect),
                )
                .await?,
        )
    } else {
        None
    };

    let tokens = state.tokens.issue(&outcome.user, client_id, scopes).await?;

    Ok(TokenResponse::new(tokens, device_token))
}

/// A device is only remembered after a code was actually checked.
fn remembers(satisfied_by: SatisfiedBy) -> bool {
    matches!(satisfied_by, SatisfiedBy::Otp | SatisfiedBy::MfaToken)
}

/// Authenticate and issue an authorization code (PKCE S256)
///
/// Redirects with `303 See Other` to `redirect_uri?code=...&state=...`.
#[utoipa::path(
    post,
    path = "/connect/authorize",
    request_body(content = AuthorizeForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Redirect back to the client with a code"),
        (status = 400, description = "Invalid client, redirect or PKCE parameters", body = ErrorResponse),
        (status = 401, description = "Invalid credentials or second factor required", body = ErrorResponse)
    ),
    tag = "Connect"
)]
pub async fn authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    jar: CookieJar,
    ValidatedForm(form): ValidatedForm<AuthorizeForm>,
) -> Result<impl IntoResponse, AppError> {
    let request = AuthorizeRequest {
        client_id: form.client_id.trim().to_string(),
        redirect_uri: form.redirect_uri.clone(),
        code_challenge: form.code_challenge.clone(),
        code_challenge_method: form.code_challenge_method.clone(),
        scopes: parse_scopes(form.scope.as_deref())?,
    };

    // Client and redirect problems surface before any OTP is sent.
    state.tokens.validate_authorize_request(&request).await?;

    let cookie_token = jar.get(DEVICE_COOKIE).map(|c| c.value().to_string());
    let factor = SecondFactor {
        device_token: form.device_token.as_deref().or(cookie_token.as_deref()),
        ..form.second_factor()
    };

    let tenant = resolve_login_tenant(&state, form.tenant.as_deref(), &headers).await?;
    let outcome = state
        .login
        .authenticate(&tenant, &form.username, &Password::new(form.password.clone()), factor)
        .await?;

    let jar = if form.remember_device && remembers(outcome.satisfied_by) {
        let device_token = state
            .login
            .remember_device(
                outcome.user.user_id,
                form.device_label.as_deref(),
                caller_ip(&headers, connect.as_ref()),
            )
            .await?;

        jar.add(
            Cookie::build((DEVICE_COOKIE, device_token))
                .path("/connect")
                .http_only(true)
                .secure(true)
                .same_site(SameSite::Lax)
                .max_age(time::Duration::days(
                    state.config.security.trusted_device_expiry_days,
                ))
                .build(),
        )
    } else {
        jar
    };

    let code = state.tokens.authorize(&tenant, &outcome.user, &request).await?;

    let location = redirect_location(&request.redirect_uri, &code, form.state.as_deref());
    Ok((jar, Redirect::to(&location)))
}

fn redirect_location(redirect_uri: &str, code: &str, state: Option<&str>) -> String {
    let separator = if redirect_uri.contains('?') { '&' } else { '?' };
    let mut location = format!("{}{}code={}", redirect_uri, separator, urlencoding::encode(code));
    if let Some(state) = state.filter(|s| !s.is_empty()) {
        location.push_str("&state=");
        location.push_str(&urlencoding::encode(state));
    }
    location
}

/// Introspect an access token
#[utoipa::path(
    post,
    path = "/connect/introspect",
    request_body(content = IntrospectRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token status", body = IntrospectResponse),
        (status = 401, description = "Unknown client", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Connect"
)]
pub async fn introspect(
    State(state): State<AppState>,
    ValidatedForm(req): ValidatedForm<IntrospectRequest>,
) -> Result<Json<IntrospectResponse>, AppError> {
    let result = state.tokens.introspect(req.client_id.trim(), req.token.trim()).await?;
    Ok(Json(result.into()))
}

/// Revoke the grant behind the presented access token
#[utoipa::path(
    post,
    path = "/connect/logout",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Invalid or revoked token", body = ErrorResponse)
    ),
    tag = "Connect",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    state.tokens.revoke_grant(user.grant_id).await?;

    tracing::info!(user_id = %user.user_id(), grant_id = %user.grant_id, "User logged out");
    Ok((StatusCode::OK, Json(MessageResponse::new("Logged out successfully"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_location() {
        assert_eq!(
            redirect_location("https://app.example.com/cb", "abc", Some("xyz")),
            "https://app.example.com/cb?code=abc&state=xyz"
        );
        assert_eq!(
            redirect_location("https://app.example.com/cb?tab=1", "abc", None),
            "https://app.example.com/cb?tab=1&code=abc"
        );
        assert_eq!(
            redirect_location("https://app.example.com/cb", "a-b_c", Some("s p")),
            "https://app.example.com/cb?code=a-b_c&state=s%20p"
        );
    }

    #[test]
    fn test_only_checked_codes_remember_devices() {
        assert!(remembers(SatisfiedBy::Otp));
        assert!(remembers(SatisfiedBy::MfaToken));
        assert!(!remembers(SatisfiedBy::TrustedDevice));
        assert!(!remembers(SatisfiedBy::NotRequired));
    }
}
