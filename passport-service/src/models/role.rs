//! Closed set of role kinds carried in access tokens.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Operator of the authority itself, not bound to a tenant.
    PassportAdmin,
    /// Administers users of their own tenant.
    TenantAdmin,
    User,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::PassportAdmin, Role::TenantAdmin, Role::User];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::PassportAdmin => "passport_admin",
            Role::TenantAdmin => "tenant_admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passport_admin" => Ok(Role::PassportAdmin),
            "tenant_admin" => Ok(Role::TenantAdmin),
            "user" => Ok(Role::User),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Parse role codes, silently dropping ones this build does not know.
pub fn parse_roles<I, S>(codes: I) -> Vec<Role>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    codes
        .into_iter()
        .filter_map(|code| code.as_ref().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_codes() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn test_parse_roles_skips_unknown() {
        let roles = parse_roles(["user", "superuser", "tenant_admin"]);
        assert_eq!(roles, vec![Role::User, Role::TenantAdmin]);
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&Role::PassportAdmin).unwrap();
        assert_eq!(json, "\"passport_admin\"");
    }
}
