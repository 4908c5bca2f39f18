use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Unknown user or wrong password.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Tenant is inactive")]
    InactiveTenant,

    #[error("Second factor required")]
    SecondFactorRequired { user_id: Uuid },

    /// Wrong code, expired ticket or wrong purpose.
    #[error("Invalid or expired OTP")]
    InvalidOrExpiredOtp,

    /// Expired, revoked or superseded by a security stamp rotation.
    #[error("Invalid or revoked token")]
    InvalidOrRevokedToken,

    /// Caller did not identify as a registered client.
    #[error("Invalid client")]
    InvalidClient,

    #[error("Resource belongs to another tenant")]
    CrossTenantAccess,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Forbidden")]
    Forbidden,

    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

impl ServiceError {
    pub fn invalid_grant(msg: impl Into<String>) -> Self {
        ServiceError::InvalidGrant(msg.into())
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Redis(e) => AppError::RedisError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
            // Account state is never revealed to the caller.
            ServiceError::InvalidCredentials | ServiceError::InactiveTenant => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::SecondFactorRequired { user_id } => {
                AppError::SecondFactorRequired(user_id.to_string())
            }
            ServiceError::InvalidOrExpiredOtp => {
                AppError::BadRequest(anyhow::anyhow!("Invalid or expired OTP"))
            }
            ServiceError::InvalidOrRevokedToken => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid or revoked token"))
            }
            ServiceError::InvalidClient => {
                AppError::Unauthorized(anyhow::anyhow!("invalid_client"))
            }
            ServiceError::CrossTenantAccess => {
                AppError::NotFound(anyhow::anyhow!("Resource not found"))
            }
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::Forbidden => {
                AppError::Forbidden(anyhow::anyhow!("Not allowed for this role"))
            }
            ServiceError::InvalidGrant(msg) => {
                AppError::BadRequest(anyhow::anyhow!("invalid_grant: {}", msg))
            }
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::DeliveryFailed(msg) => {
                tracing::error!(error = %msg, "Outbound delivery failed");
                AppError::ServiceUnavailable
            }
        }
    }
}

/// Map a Postgres unique violation to a conflict, anything else to a database error.
pub fn map_unique_violation(err: sqlx::Error, what: &str) -> ServiceError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            ServiceError::Conflict(format!("{} already exists", what))
        }
        _ => ServiceError::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::axum::{http::StatusCode, response::IntoResponse};

    fn status_of(err: ServiceError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn test_account_state_is_reported_as_bad_credentials() {
        assert_eq!(status_of(ServiceError::InvalidCredentials), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ServiceError::InactiveTenant), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_taxonomy_statuses() {
        assert_eq!(status_of(ServiceError::InvalidOrExpiredOtp), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(ServiceError::InvalidOrRevokedToken), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ServiceError::InvalidClient), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(ServiceError::CrossTenantAccess), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ServiceError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(ServiceError::invalid_grant("unsupported_grant_type")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ServiceError::DeliveryFailed("sms down".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
