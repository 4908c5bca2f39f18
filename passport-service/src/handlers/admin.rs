use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        admin::{
            CreateTenantRequest, CreateUserRequest, ForceLogoutResponse, InvitationResponse,
            InviteUserRequest, RegisterClientRequest, RoleInfo,
        },
        ErrorResponse,
    },
    middleware::AuthUser,
    models::{Client, DeviceInfo, Tenant, UserProfile},
    utils::ValidatedJson,
    AppState,
};

/// Force logout: revoke every grant, rotate the stamp, revoke every device
#[utoipa::path(
    delete,
    path = "/admin/users/{user_id}/sessions",
    params(("user_id" = Uuid, Path, description = "User to log out everywhere")),
    responses(
        (status = 200, description = "All sessions revoked", body = ForceLogoutResponse),
        (status = 403, description = "Role not allowed", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 503, description = "Some steps failed, safe to retry", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn force_logout(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ForceLogoutResponse>, AppError> {
    let report = state.admin.force_logout(&caller.principal, user_id).await?;

    if !report.is_complete() {
        tracing::error!(user_id = %user_id, report = ?report, "Force logout incomplete");
        return Err(AppError::ServiceUnavailable);
    }

    Ok(Json(ForceLogoutResponse {
        report,
        message: "All sessions revoked".to_string(),
    }))
}

/// List a user's active trusted devices
#[utoipa::path(
    get,
    path = "/admin/users/{user_id}/devices",
    params(("user_id" = Uuid, Path, description = "User whose devices to list")),
    responses(
        (status = 200, description = "Active devices", body = [DeviceInfo]),
        (status = 403, description = "Role not allowed", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn list_user_devices(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<DeviceInfo>>, AppError> {
    Ok(Json(state.admin.list_user_devices(&caller.principal, user_id).await?))
}

/// Revoke any device in the caller's reach
#[utoipa::path(
    delete,
    path = "/admin/devices/{device_id}",
    params(("device_id" = Uuid, Path, description = "Device to revoke")),
    responses(
        (status = 204, description = "Device revoked"),
        (status = 403, description = "Role not allowed", body = ErrorResponse),
        (status = 404, description = "Device not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn revoke_device(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(device_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.admin.revoke_device(&caller.principal, device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// List tenants
#[utoipa::path(
    get,
    path = "/admin/tenants",
    responses(
        (status = 200, description = "All tenants", body = [Tenant]),
        (status = 403, description = "Role not allowed", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn list_tenants(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Json<Vec<Tenant>>, AppError> {
    Ok(Json(state.admin.list_tenants(&caller.principal).await?))
}

/// Create a tenant
#[utoipa::path(
    post,
    path = "/admin/tenants",
    request_body = CreateTenantRequest,
    responses(
        (status = 201, description = "Tenant created", body = Tenant),
        (status = 403, description = "Role not allowed", body = ErrorResponse),
        (status = 409, description = "Slug or domain already taken", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn create_tenant(
    State(state): State<AppState>,
    caller: AuthUser,
    ValidatedJson(req): ValidatedJson<CreateTenantRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tenant = state.admin.create_tenant(&caller.principal, req).await?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

/// List users of a tenant
#[utoipa::path(
    get,
    path = "/admin/tenants/{tenant_id}/users",
    params(("tenant_id" = Uuid, Path, description = "Tenant")),
    responses(
        (status = 200, description = "Users with masked phone numbers", body = [UserProfile]),
        (status = 403, description = "Role not allowed", body = ErrorResponse),
        (status = 404, description = "Tenant not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(tenant_id): Path<Uuid>,
) -> Result<Json<Vec<UserProfile>>, AppError> {
    Ok(Json(state.admin.list_users(&caller.principal, tenant_id).await?))
}

/// Create a user with a password
#[utoipa::path(
    post,
    path = "/admin/tenants/{tenant_id}/users",
    params(("tenant_id" = Uuid, Path, description = "Tenant")),
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = UserProfile),
        (status = 403, description = "Role not allowed", body = ErrorResponse),
        (status = 404, description = "Tenant not found", body = ErrorResponse),
        (status = 409, description = "Username or email taken", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn create_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(tenant_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let profile = state.admin.create_user(&caller.principal, tenant_id, req).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// Invite a user by email
#[utoipa::path(
    post,
    path = "/admin/tenants/{tenant_id}/invitations",
    params(("tenant_id" = Uuid, Path, description = "Tenant")),
    request_body = InviteUserRequest,
    responses(
        (status = 201, description = "Invitation sent", body = InvitationResponse),
        (status = 403, description = "Role not allowed", body = ErrorResponse),
        (status = 409, description = "Username or email taken", body = ErrorResponse),
        (status = 503, description = "Email delivery failed", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn invite_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(tenant_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<InviteUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.admin.invite_user(&caller.principal, tenant_id, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(InvitationResponse {
            user_id: user.user_id,
            email: user.email.unwrap_or_default(),
            message: "Invitation sent".to_string(),
        }),
    ))
}

/// Register a client application for the authorization-code flow
#[utoipa::path(
    post,
    path = "/admin/clients",
    request_body = RegisterClientRequest,
    responses(
        (status = 201, description = "Client registered", body = Client),
        (status = 400, description = "Invalid redirect URI", body = ErrorResponse),
        (status = 403, description = "Role not allowed", body = ErrorResponse),
        (status = 409, description = "Client id taken", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn register_client(
    State(state): State<AppState>,
    caller: AuthUser,
    ValidatedJson(req): ValidatedJson<RegisterClientRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client = state.admin.register_client(&caller.principal, req).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

/// List the role set
#[utoipa::path(
    get,
    path = "/admin/roles",
    responses(
        (status = 200, description = "Roles", body = [RoleInfo]),
        (status = 403, description = "Role not allowed", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn list_roles(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Json<Vec<RoleInfo>>, AppError> {
    Ok(Json(state.admin.list_roles(&caller.principal)?))
}
