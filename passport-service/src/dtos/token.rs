use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::services::login::SecondFactor;
use crate::services::token_authority::{Introspection, IssuedTokens};

/// `POST /connect/token` form. Which fields are required depends on
/// `grant_type`.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct TokenRequest {
    #[validate(length(min = 1, message = "grant_type is required"))]
    #[schema(example = "password")]
    pub grant_type: String,

    // password
    #[schema(example = "acme")]
    pub tenant: Option<String>,
    #[schema(example = "alice")]
    pub username: Option<String>,
    pub password: Option<String>,
    #[schema(example = "openid profile offline_access")]
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub otp: Option<String>,
    pub mfa_token: Option<String>,
    pub device_token: Option<String>,
    #[serde(default)]
    pub remember_device: bool,
    #[schema(example = "Work laptop")]
    pub device_label: Option<String>,

    // refresh_token
    pub refresh_token: Option<String>,

    // authorization_code
    pub code: Option<String>,
    pub code_verifier: Option<String>,
    pub redirect_uri: Option<String>,
}

impl TokenRequest {
    pub fn second_factor(&self) -> SecondFactor<'_> {
        SecondFactor {
            otp: self.otp.as_deref(),
            mfa_token: self.mfa_token.as_deref(),
            device_token: self.device_token.as_deref(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    #[schema(example = 3600)]
    pub expires_in: i64,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[schema(example = "openid roles offline_access")]
    pub scope: String,
    /// Raw trusted-device token, returned once when `remember_device` was set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
}

impl TokenResponse {
    pub fn new(tokens: IssuedTokens, device_token: Option<String>) -> Self {
        Self {
            access_token: tokens.access_token,
            token_type: "Bearer".to_string(),
            expires_in: tokens.expires_in,
            refresh_token: tokens.refresh_token,
            id_token: tokens.id_token,
            scope: tokens.scope,
            device_token,
        }
    }
}

/// `POST /connect/authorize` form: the code request plus the login fields of
/// the password grant.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AuthorizeForm {
    #[validate(length(min = 1, message = "client_id is required"))]
    pub client_id: String,
    #[validate(length(min = 1, message = "redirect_uri is required"))]
    #[schema(example = "https://portal.acme.com/callback")]
    pub redirect_uri: String,
    #[validate(length(min = 1, message = "code_challenge is required"))]
    pub code_challenge: String,
    #[validate(length(min = 1, message = "code_challenge_method is required"))]
    #[schema(example = "S256")]
    pub code_challenge_method: String,
    pub scope: Option<String>,
    pub state: Option<String>,

    pub tenant: Option<String>,
    #[validate(length(min = 1, message = "username is required"))]
    pub username: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
    pub otp: Option<String>,
    pub mfa_token: Option<String>,
    pub device_token: Option<String>,
    #[serde(default)]
    pub remember_device: bool,
    pub device_label: Option<String>,
}

impl AuthorizeForm {
    pub fn second_factor(&self) -> SecondFactor<'_> {
        SecondFactor {
            otp: self.otp.as_deref(),
            mfa_token: self.mfa_token.as_deref(),
            device_token: self.device_token.as_deref(),
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct IntrospectRequest {
    #[validate(length(min = 1, message = "client_id is required"))]
    #[schema(example = "portal")]
    pub client_id: String,
    #[validate(length(min = 1, message = "token is required"))]
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IntrospectResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl From<Introspection> for IntrospectResponse {
    fn from(result: Introspection) -> Self {
        match result.claims.filter(|_| result.active) {
            Some(claims) => Self {
                active: true,
                sub: Some(claims.sub),
                tenant_id: Some(claims.tenant_id),
                roles: Some(claims.roles),
                scope: Some(claims.scope),
                exp: Some(claims.exp),
                iss: Some(claims.iss),
            },
            None => Self {
                active: false,
                sub: None,
                tenant_id: None,
                roles: None,
                scope: None,
                exp: None,
                iss: None,
            },
        }
    }
}
