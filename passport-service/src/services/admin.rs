//! Administrative operations. Every entry point takes the calling
//! [`Principal`] and checks the action before touching the target, then the
//! target's tenant.

use std::sync::Arc;
use uuid::Uuid;

use crate::config::BootstrapConfig;
use crate::dtos::admin::{
    CreateTenantRequest, CreateUserRequest, InviteUserRequest, RegisterClientRequest, RoleInfo,
};
use crate::models::{
    tenant::is_valid_slug, Client, DeviceInfo, Role, Tenant, TokenKind, User, UserProfile,
};
use crate::services::{
    accounts::issue_verification_token,
    credentials::hash_for_storage,
    email::EmailProvider,
    policy::{self, Action, Principal},
    session_revocation::{ForceLogoutReport, SessionRevocationService},
    trusted_devices::TrustedDeviceRegistry,
    ServiceError,
};
use crate::services::tenant_directory::normalize_host;
use crate::store::Store;
use crate::utils::Password;

#[derive(Clone)]
pub struct AdminService {
    store: Arc<dyn Store>,
    devices: TrustedDeviceRegistry,
    revocation: SessionRevocationService,
    email: Arc<dyn EmailProvider>,
    web_app_base_url: String,
}

impl AdminService {
    pub fn new(
        store: Arc<dyn Store>,
        devices: TrustedDeviceRegistry,
        revocation: SessionRevocationService,
        email: Arc<dyn EmailProvider>,
        web_app_base_url: String,
    ) -> Self {
        Self {
            store,
            devices,
            revocation,
            email,
            web_app_base_url,
        }
    }

    /// Look up a user and make sure the caller may see them.
    async fn scoped_user(&self, principal: &Principal, user_id: Uuid) -> Result<User, ServiceError> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(ServiceError::NotFound("User"))?;
        principal.ensure_tenant_scope(user.tenant_id)?;
        Ok(user)
    }

    async fn scoped_tenant(&self, principal: &Principal, tenant_id: Uuid) -> Result<Tenant, ServiceError> {
        principal.ensure_tenant_scope(tenant_id)?;
        self.store
            .find_tenant_by_id(tenant_id)
            .await?
            .ok_or(ServiceError::NotFound("Tenant"))
    }

    pub async fn force_logout(
        &self,
        principal: &Principal,
        user_id: Uuid,
    ) -> Result<ForceLogoutReport, ServiceError> {
        principal.authorize(Action::ForceLogout)?;
        let user = self.scoped_user(principal, user_id).await?;

        tracing::info!(
            actor = %principal.user_id,
            user_id = %user.user_id,
            "Force logout requested"
        );
        Ok(self.revocation.force_logout(user.user_id).await)
    }

    pub async fn list_user_devices(
        &self,
        principal: &Principal,
        user_id: Uuid,
    ) -> Result<Vec<DeviceInfo>, ServiceError> {
        principal.authorize(Action::ListUserDevices)?;
        let user = self.scoped_user(principal, user_id).await?;

        let devices = self.devices.list_active(user.user_id).await?;
        Ok(devices.into_iter().map(DeviceInfo::from).collect())
    }

    pub async fn revoke_device(&self, principal: &Principal, device_id: Uuid) -> Result<(), ServiceError> {
        principal.authorize(Action::RevokeAnyDevice)?;

        let device = self
            .devices
            .find(device_id)
            .await?
            .ok_or(ServiceError::NotFound("Device"))?;
        self.scoped_user(principal, device.user_id).await?;

        self.devices.revoke(device_id).await?;
        tracing::info!(actor = %principal.user_id, device_id = %device_id, "Device revoked by admin");
        Ok(())
    }

    pub async fn create_tenant(
        &self,
        principal: &Principal,
        req: CreateTenantRequest,
    ) -> Result<Tenant, ServiceError> {
        principal.authorize(Action::CreateTenant)?;

        let slug = req.tenant_slug.trim().to_lowercase();
        if !is_valid_slug(&slug) {
            return Err(ServiceError::Validation("Invalid tenant slug".to_string()));
        }

        let mut tenant = Tenant::new(req.tenant_name.trim().to_string(), slug);
        if let Some(domain) = req.custom_domain.as_deref() {
            let domain = normalize_host(domain)
                .ok_or_else(|| ServiceError::Validation("Invalid custom domain".to_string()))?;
            tenant = tenant.with_custom_domain(domain);
        }
        if let Some(subdomain) = req.subdomain_slug {
            tenant = tenant.with_subdomain(subdomain);
        }

        self.store.insert_tenant(&tenant).await?;

        tracing::info!(
            actor = %principal.user_id,
            tenant_id = %tenant.tenant_id,
            tenant = %tenant.tenant_slug,
            "Tenant created"
        );
        Ok(tenant)
    }

    pub async fn list_tenants(&self, principal: &Principal) -> Result<Vec<Tenant>, ServiceError> {
        principal.authorize(Action::ListTenants)?;
        self.store.list_tenants().await
    }

    pub async fn create_user(
        &self,
        principal: &Principal,
        tenant_id: Uuid,
        req: CreateUserRequest,
    ) -> Result<UserProfile, ServiceError> {
        principal.authorize(Action::CreateUser)?;
        let tenant = self.scoped_tenant(principal, tenant_id).await?;

        let roles = requested_roles(req.roles);
        policy::ensure_can_grant(&principal.roles, &roles)?;

        let hash = hash_for_storage(&Password::new(req.password))?;

        let mut user = User::new(tenant.tenant_id, req.username.trim().to_string(), Some(hash.into_string()));
        user.email = req.email.map(|e| e.trim().to_string());
        user.display_name = req.display_name;

        self.store.insert_user(&user, &roles).await?;

        tracing::info!(
            actor = %principal.user_id,
            user_id = %user.user_id,
            tenant = %tenant.tenant_slug,
            "User created"
        );
        Ok(UserProfile::new(user, roles))
    }

    /// Create the user inactive and without a password, then email a link
    /// that lets them choose one.
    pub async fn invite_user(
        &self,
        principal: &Principal,
        tenant_id: Uuid,
        req: InviteUserRequest,
    ) -> Result<User, ServiceError> {
        principal.authorize(Action::InviteUser)?;
        let tenant = self.scoped_tenant(principal, tenant_id).await?;

        let roles = requested_roles(req.roles);
        policy::ensure_can_grant(&principal.roles, &roles)?;

        let email = req.email.trim().to_string();
        let mut user = User::new(tenant.tenant_id, req.username.trim().to_string(), None);
        user.is_active = false;
        user.email = Some(email.clone());
        user.display_name = req.display_name;

        self.store.insert_user(&user, &roles).await?;

        let token =
            issue_verification_token(self.store.as_ref(), user.user_id, TokenKind::EmailVerification)
                .await?;

        self.email
            .send_invitation_email(&email, user.user_id, &token, &self.web_app_base_url)
            .await
            .map_err(|e| ServiceError::DeliveryFailed(format!("invitation email: {}", e)))?;

        tracing::info!(
            actor = %principal.user_id,
            user_id = %user.user_id,
            tenant = %tenant.tenant_slug,
            "User invited"
        );
        Ok(user)
    }

    pub async fn list_users(
        &self,
        principal: &Principal,
        tenant_id: Uuid,
    ) -> Result<Vec<UserProfile>, ServiceError> {
        principal.authorize(Action::ListUsers)?;
        let tenant = self.scoped_tenant(principal, tenant_id).await?;

        let users = self.store.list_users_by_tenant(tenant.tenant_id).await?;
        let mut profiles = Vec::with_capacity(users.len());
        for user in users {
            let roles = self.store.find_roles(user.user_id).await?;
            profiles.push(UserProfile::new(user, roles).masked());
        }
        Ok(profiles)
    }

    pub async fn register_client(
        &self,
        principal: &Principal,
        req: RegisterClientRequest,
    ) -> Result<Client, ServiceError> {
        principal.authorize(Action::ManageClients)?;

        if let Some(bad) = req.redirect_uris.iter().find(|uri| !is_valid_redirect_uri(uri)) {
            return Err(ServiceError::Validation(format!("Invalid redirect URI: {}", bad)));
        }

        let client = Client::new(req.client_id.trim().to_string(), req.client_name, req.redirect_uris);
        self.store.insert_client(&client).await?;

        tracing::info!(actor = %principal.user_id, client_id = %client.client_id, "Client registered");
        Ok(client)
    }

    pub fn list_roles(&self, principal: &Principal) -> Result<Vec<RoleInfo>, ServiceError> {
        principal.authorize(Action::ListRoles)?;

        Ok(Role::ALL
            .iter()
            .map(|role| RoleInfo {
                role: *role,
                description: match role {
                    Role::PassportAdmin => "Operates the authority across all tenants",
                    Role::TenantAdmin => "Administers users of one tenant",
                    Role::User => "Regular account",
                }
                .to_string(),
                cross_tenant: policy::is_cross_tenant(&[*role]),
            })
            .collect())
    }
}

fn requested_roles(roles: Option<Vec<Role>>) -> Vec<Role> {
    let mut roles = roles.unwrap_or_default().into_iter().fold(Vec::new(), |mut acc, role| {
        if !acc.contains(&role) {
            acc.push(role);
        }
        acc
    });
    if roles.is_empty() {
        roles.push(Role::User);
    }
    roles
}

/// Absolute URI without a fragment.
fn is_valid_redirect_uri(uri: &str) -> bool {
    match uri.split_once("://") {
        Some((scheme, rest)) => !scheme.is_empty() && !rest.is_empty() && !uri.contains('#'),
        None => false,
    }
}

/// Seed the bootstrap tenant and its passport admin. Existing rows are left
/// alone so restarts are harmless.
pub async fn seed_bootstrap_admin(store: &dyn Store, config: &BootstrapConfig) -> Result<(), ServiceError> {
    let tenant = match store.find_tenant_by_slug(&config.tenant_slug).await? {
        Some(tenant) => tenant,
        None => {
            let tenant = Tenant::new(config.tenant_name.clone(), config.tenant_slug.clone());
            store.insert_tenant(&tenant).await?;
            tracing::info!(tenant = %tenant.tenant_slug, "Bootstrap tenant created");
            tenant
        }
    };

    if store
        .find_user_by_username(tenant.tenant_id, &config.username)
        .await?
        .is_some()
    {
        tracing::debug!(username = %config.username, "Bootstrap admin already present");
        return Ok(());
    }

    let hash = hash_for_storage(&Password::new(config.password.clone()))?;
    let mut user = User::new(tenant.tenant_id, config.username.clone(), Some(hash.into_string()));
    user.email = config.email.clone();
    user.email_confirmed = config.email.is_some();

    store.insert_user(&user, &[Role::PassportAdmin]).await?;
    tracing::info!(user_id = %user.user_id, tenant = %tenant.tenant_slug, "Bootstrap admin created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_uri_rules() {
        assert!(is_valid_redirect_uri("https://portal.example.com/callback"));
        assert!(is_valid_redirect_uri("com.example.app://callback"));
        assert!(!is_valid_redirect_uri("/callback"));
        assert!(!is_valid_redirect_uri("https://portal.example.com/cb#frag"));
        assert!(!is_valid_redirect_uri("https://"));
    }

    #[test]
    fn test_requested_roles_default_to_user() {
        assert_eq!(requested_roles(None), vec![Role::User]);
        assert_eq!(requested_roles(Some(vec![])), vec![Role::User]);
        assert_eq!(
            requested_roles(Some(vec![Role::TenantAdmin, Role::TenantAdmin])),
            vec![Role::TenantAdmin]
        );
    }
}
