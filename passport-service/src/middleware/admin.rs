use axum::{extract::Request, middleware::Next, response::Response};
use service_core::error::AppError;

use crate::middleware::auth::AuthUser;
use crate::models::Role;

/// Coarse gate for `/admin`: the caller must hold an administrative role.
/// Per-action checks happen in the admin service.
pub async fn require_admin_role(request: Request, next: Next) -> Result<Response, AppError> {
    let is_admin = request
        .extensions()
        .get::<AuthUser>()
        .map(|user| {
            user.principal
                .roles
                .iter()
                .any(|role| matches!(role, Role::PassportAdmin | Role::TenantAdmin))
        })
        .unwrap_or(false);

    if !is_admin {
        tracing::warn!("Admin route denied for non-admin caller");
        return Err(AppError::Forbidden(anyhow::anyhow!("Administrative role required")));
    }

    Ok(next.run(request).await)
}
