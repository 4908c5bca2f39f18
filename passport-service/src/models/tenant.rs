//! Tenant model - root of the multi-tenancy hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

pub const MAX_SLUG_LEN: usize = 50;
pub const MAX_NAME_LEN: usize = 100;

/// Tenant entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub tenant_slug: String,
    pub is_active: bool,
    pub custom_domain: Option<String>,
    pub subdomain_slug: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl Tenant {
    /// Create a new active tenant.
    pub fn new(tenant_name: String, tenant_slug: String) -> Self {
        Self {
            tenant_id: Uuid::new_v4(),
            tenant_name,
            tenant_slug,
            is_active: true,
            custom_domain: None,
            subdomain_slug: None,
            created_utc: Utc::now(),
        }
    }

    pub fn with_custom_domain(mut self, domain: impl Into<String>) -> Self {
        self.custom_domain = Some(domain.into().to_lowercase());
        self
    }

    pub fn with_subdomain(mut self, slug: impl Into<String>) -> Self {
        self.subdomain_slug = Some(slug.into().to_lowercase());
        self
    }
}

/// Slugs are lowercase letters, digits and hyphens.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
