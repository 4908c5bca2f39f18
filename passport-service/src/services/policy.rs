//! Role-based authorization for administrative actions.
//!
//! Two separate checks: whether a role may perform an action at all
//! ([`authorize`]), and whether the target lives in the caller's tenant
//! ([`ensure_tenant_scope`]). The second one turns foreign resources into a
//! plain not-found.

use uuid::Uuid;

use crate::models::Role;
use crate::services::ServiceError;

/// Authenticated caller as established from a validated access token.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn authorize(&self, action: Action) -> Result<(), ServiceError> {
        authorize(&self.roles, action)
    }

    pub fn ensure_tenant_scope(&self, target_tenant: Uuid) -> Result<(), ServiceError> {
        ensure_tenant_scope(&self.roles, self.tenant_id, target_tenant)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ForceLogout,
    ListUserDevices,
    RevokeAnyDevice,
    CreateTenant,
    ListTenants,
    CreateUser,
    InviteUser,
    ListUsers,
    ManageClients,
    ListRoles,
}

pub fn is_allowed(role: Role, action: Action) -> bool {
    match role {
        Role::PassportAdmin => true,
        Role::TenantAdmin => matches!(
            action,
            Action::ForceLogout
                | Action::ListUserDevices
                | Action::RevokeAnyDevice
                | Action::CreateUser
                | Action::InviteUser
                | Action::ListUsers
                | Action::ListRoles
        ),
        Role::User => false,
    }
}

pub fn authorize(roles: &[Role], action: Action) -> Result<(), ServiceError> {
    if roles.iter().any(|role| is_allowed(*role, action)) {
        Ok(())
    } else {
        tracing::warn!(?action, ?roles, "Action denied by policy");
        Err(ServiceError::Forbidden)
    }
}

/// Passport admins act across tenants; everyone else only inside their own.
pub fn ensure_tenant_scope(
    roles: &[Role],
    caller_tenant: Uuid,
    target_tenant: Uuid,
) -> Result<(), ServiceError> {
    if is_cross_tenant(roles) || caller_tenant == target_tenant {
        Ok(())
    } else {
        Err(ServiceError::CrossTenantAccess)
    }
}

pub fn is_cross_tenant(roles: &[Role]) -> bool {
    roles.contains(&Role::PassportAdmin)
}

/// Only passport admins can hand out `passport_admin`.
pub fn ensure_can_grant(roles: &[Role], granted: &[Role]) -> Result<(), ServiceError> {
    if granted.contains(&Role::PassportAdmin) && !is_cross_tenant(roles) {
        return Err(ServiceError::Forbidden);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix() {
        assert!(is_allowed(Role::PassportAdmin, Action::CreateTenant));
        assert!(is_allowed(Role::TenantAdmin, Action::ForceLogout));
        assert!(!is_allowed(Role::TenantAdmin, Action::CreateTenant));
        assert!(!is_allowed(Role::TenantAdmin, Action::ManageClients));
        assert!(!is_allowed(Role::User, Action::ListRoles));
    }

    #[test]
    fn test_authorize_any_role() {
        assert!(authorize(&[Role::User, Role::TenantAdmin], Action::ListUsers).is_ok());
        assert!(matches!(
            authorize(&[Role::User], Action::ListUsers),
            Err(ServiceError::Forbidden)
        ));
        assert!(authorize(&[], Action::ListRoles).is_err());
    }

    #[test]
    fn test_tenant_scope() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(ensure_tenant_scope(&[Role::TenantAdmin], a, a).is_ok());
        assert!(matches!(
            ensure_tenant_scope(&[Role::TenantAdmin], a, b),
            Err(ServiceError::CrossTenantAccess)
        ));
        assert!(ensure_tenant_scope(&[Role::PassportAdmin], a, b).is_ok());
    }

    #[test]
    fn test_tenant_admin_cannot_mint_passport_admins() {
        assert!(ensure_can_grant(&[Role::TenantAdmin], &[Role::User, Role::TenantAdmin]).is_ok());
        assert!(ensure_can_grant(&[Role::TenantAdmin], &[Role::PassportAdmin]).is_err());
        assert!(ensure_can_grant(&[Role::PassportAdmin], &[Role::PassportAdmin]).is_ok());
    }
}
