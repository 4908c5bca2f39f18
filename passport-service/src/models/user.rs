//! User model. A user belongs to exactly one tenant for its whole lifetime.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::Role;

/// User entity.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub password_hash: Option<String>,
    pub phone_number: Option<String>,
    pub phone_confirmed: bool,
    pub two_factor_enabled: bool,
    pub email_confirmed: bool,
    pub is_active: bool,
    /// Opaque version token; any security-relevant change replaces it.
    pub security_stamp: String,
    pub last_logout_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl User {
    /// Create an active user with an already hashed password.
    pub fn new(tenant_id: Uuid, username: String, password_hash: Option<String>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            tenant_id,
            username,
            email: None,
            display_name: None,
            password_hash,
            phone_number: None,
            phone_confirmed: false,
            two_factor_enabled: false,
            email_confirmed: false,
            is_active: true,
            security_stamp: new_security_stamp(),
            last_logout_utc: None,
            created_utc: Utc::now(),
        }
    }

    /// Phone number usable for login codes, if enrollment completed.
    pub fn confirmed_phone(&self) -> Option<&str> {
        if self.phone_confirmed {
            self.phone_number.as_deref()
        } else {
            None
        }
    }
}

pub fn new_security_stamp() -> String {
    Uuid::new_v4().simple().to_string()
}

/// User view safe to return over the API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    /// Masked unless the caller is looking at their own profile.
    pub phone_number: Option<String>,
    pub phone_confirmed: bool,
    pub two_factor_enabled: bool,
    pub email_confirmed: bool,
    pub is_active: bool,
    pub roles: Vec<Role>,
    pub last_logout_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl UserProfile {
    pub fn new(user: User, roles: Vec<Role>) -> Self {
        Self {
            user_id: user.user_id,
            tenant_id: user.tenant_id,
            username: user.username,
            email: user.email,
            display_name: user.display_name,
            phone_number: user.phone_number,
            phone_confirmed: user.phone_confirmed,
            two_factor_enabled: user.two_factor_enabled,
            email_confirmed: user.email_confirmed,
            is_active: user.is_active,
            roles,
            last_logout_utc: user.last_logout_utc,
            created_utc: user.created_utc,
        }
    }

    pub fn masked(mut self) -> Self {
        self.phone_number = self.phone_number.as_deref().map(mask_phone);
        self
    }
}

/// Keep the last two digits of a phone number.
pub fn mask_phone(phone: &str) -> String {
    let visible: String = phone
        .chars()
        .rev()
        .take(2)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{}", visible)
}
