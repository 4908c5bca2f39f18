//! HTTP handlers for passport-service.

pub mod account;
pub mod admin;
pub mod devices;
pub mod token;
pub mod well_known;

use axum::{
    extract::ConnectInfo,
    http::{header, HeaderMap},
};
use service_core::error::AppError;
use std::net::SocketAddr;

use crate::{models::Tenant, AppState};

pub fn request_host(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-forwarded-host")
        .or_else(|| headers.get(header::HOST))
        .and_then(|v| v.to_str().ok())
}

/// First `x-forwarded-for` hop, else the socket peer.
pub fn caller_ip(headers: &HeaderMap, connect: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| connect.map(|ConnectInfo(addr)| addr.ip().to_string()))
}

/// Tenant for a login-style request. An unknown tenant looks exactly like
/// bad credentials.
pub async fn resolve_login_tenant(
    state: &AppState,
    tenant_hint: Option<&str>,
    headers: &HeaderMap,
) -> Result<Tenant, AppError> {
    state
        .tenants
        .resolve(tenant_hint, request_host(headers))
        .await?
        .ok_or_else(|| {
            tracing::warn!(tenant = tenant_hint.unwrap_or("-"), "Login for unknown tenant");
            AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
        })
}

pub fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, AppError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("invalid_request: {} is required", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_headers_win() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("internal:8080"));
        assert_eq!(request_host(&headers), Some("internal:8080"));

        headers.insert("x-forwarded-host", HeaderValue::from_static("acme.example.com"));
        assert_eq!(request_host(&headers), Some("acme.example.com"));

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(caller_ip(&headers, None).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_required_rejects_blank() {
        assert!(required(None, "code").is_err());
        assert!(required(Some("  "), "code").is_err());
        assert_eq!(required(Some(" abc "), "code").unwrap(), "abc");
    }
}
