use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::Role;
use crate::services::session_revocation::ForceLogoutReport;
use crate::utils::validation::validate_slug;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateTenantRequest {
    #[validate(length(min = 1, max = 100, message = "Tenant name is required"))]
    #[schema(example = "Acme Corp")]
    pub tenant_name: String,

    #[validate(
        length(max = 50),
        custom(function = "validate_slug", message = "Slug must be lowercase letters, digits and hyphens")
    )]
    #[schema(example = "acme")]
    pub tenant_slug: String,

    #[schema(example = "login.acme.com")]
    pub custom_domain: Option<String>,

    #[validate(custom(function = "validate_slug"))]
    #[schema(example = "acme")]
    pub subdomain_slug: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 100, message = "Username is required"))]
    #[schema(example = "alice")]
    pub username: String,

    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    #[schema(example = "correct-horse", min_length = 6)]
    pub password: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "alice@acme.com")]
    pub email: Option<String>,

    #[schema(example = "Alice Example")]
    pub display_name: Option<String>,

    /// Defaults to `["user"]`.
    pub roles: Option<Vec<Role>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct InviteUserRequest {
    #[validate(length(min = 1, max = 100, message = "Username is required"))]
    #[schema(example = "bob")]
    pub username: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "bob@acme.com")]
    pub email: String,

    #[schema(example = "Bob Example")]
    pub display_name: Option<String>,

    pub roles: Option<Vec<Role>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InvitationResponse {
    pub user_id: Uuid,
    #[schema(example = "bob@acme.com")]
    pub email: String,
    #[schema(example = "Invitation sent")]
    pub message: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterClientRequest {
    #[validate(length(min = 1, max = 100, message = "Client id is required"))]
    #[schema(example = "portal")]
    pub client_id: String,

    #[validate(length(min = 1, max = 100, message = "Client name is required"))]
    #[schema(example = "Customer Portal")]
    pub client_name: String,

    #[validate(length(min = 1, message = "At least one redirect URI is required"))]
    #[schema(example = json!(["https://portal.acme.com/callback"]))]
    pub redirect_uris: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoleInfo {
    pub role: Role,
    pub description: String,
    /// Whether the role acts across tenants.
    pub cross_tenant: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ForceLogoutResponse {
    #[serde(flatten)]
    pub report: ForceLogoutReport,
    #[schema(example = "All sessions revoked")]
    pub message: String,
}
