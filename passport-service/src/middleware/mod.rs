pub mod admin;
pub mod auth;

pub use admin::require_admin_role;
pub use auth::{auth_middleware, AuthUser};
