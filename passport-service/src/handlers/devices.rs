use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{account::RevokedDevicesResponse, ErrorResponse},
    middleware::AuthUser,
    models::DeviceInfo,
    AppState,
};

/// List the caller's active trusted devices
#[utoipa::path(
    get,
    path = "/account/devices",
    responses(
        (status = 200, description = "Active devices", body = [DeviceInfo]),
        (status = 401, description = "Invalid or revoked token", body = ErrorResponse)
    ),
    tag = "Devices",
    security(("bearer_auth" = []))
)]
pub async fn list_devices(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<DeviceInfo>>, AppError> {
    let devices = state.devices.list_active(user.user_id()).await?;
    Ok(Json(devices.into_iter().map(DeviceInfo::from).collect()))
}

/// Revoke one of the caller's devices
#[utoipa::path(
    delete,
    path = "/account/devices/{device_id}",
    params(("device_id" = Uuid, Path, description = "Device to revoke")),
    responses(
        (status = 204, description = "Device revoked"),
        (status = 404, description = "No such device for this user", body = ErrorResponse)
    ),
    tag = "Devices",
    security(("bearer_auth" = []))
)]
pub async fn revoke_device(
    State(state): State<AppState>,
    user: AuthUser,
    Path(device_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.devices.revoke_owned(user.user_id(), device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Revoke every device of the caller
#[utoipa::path(
    delete,
    path = "/account/devices",
    responses(
        (status = 200, description = "Devices revoked", body = RevokedDevicesResponse)
    ),
    tag = "Devices",
    security(("bearer_auth" = []))
)]
pub async fn revoke_all_devices(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<RevokedDevicesResponse>, AppError> {
    let revoked = state.devices.revoke_all(user.user_id()).await?;
    Ok(Json(RevokedDevicesResponse { revoked }))
}
