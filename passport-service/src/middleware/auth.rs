use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    services::{jwt::AccessTokenClaims, Principal, ServiceError},
    AppState,
};

/// Caller established from a bearer access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub principal: Principal,
    pub claims: AccessTokenClaims,
    /// Grant the presented token belongs to.
    pub grant_id: Uuid,
}

impl AuthUser {
    fn from_claims(claims: AccessTokenClaims) -> Result<Self, ServiceError> {
        let parse = |value: &str| Uuid::parse_str(value).map_err(|_| ServiceError::InvalidOrRevokedToken);

        Ok(Self {
            principal: Principal {
                user_id: parse(&claims.sub)?,
                tenant_id: parse(&claims.tenant_id)?,
                roles: claims.roles(),
            },
            grant_id: parse(&claims.sid)?,
            claims,
        })
    }

    pub fn user_id(&self) -> Uuid {
        self.principal.user_id
    }
}

pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Require a live access token. Signature, expiry, grant and security stamp
/// are all checked against the store on every request.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers()).ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
    })?;

    let claims = state.tokens.validate_access_token(token).await?;
    let auth_user = AuthUser::from_claims(claims)?;

    req.extensions_mut().insert(auth_user);
    Ok(next.run(req).await)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthUser>().cloned().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!("Auth user missing from request extensions"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }
}
