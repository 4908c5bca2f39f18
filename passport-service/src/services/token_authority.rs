//! Grant-type state machine: password, authorization code + PKCE, refresh.
//!
//! Every issuance creates a grant row holding the hash of the current refresh
//! token and the user's security stamp at that moment. Access and refresh
//! tokens are only honoured while that grant is live and the stamp still
//! matches the user's.

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{AuthorizationCode, Client, Grant, Tenant, User};
use crate::services::jwt::{AccessTokenClaims, JwtService};
use crate::services::{CredentialStore, ServiceError, TenantDirectory};
use crate::store::Store;
use crate::utils::crypto::{
    constant_time_eq, is_valid_pkce_value, pkce_s256_challenge, random_urlsafe, sha256_hex,
};

pub const SUPPORTED_SCOPES: [&str; 6] =
    ["openid", "profile", "email", "phone", "roles", "offline_access"];
pub const DEFAULT_SCOPES: [&str; 3] = ["openid", "roles", "offline_access"];
pub const PKCE_METHOD_S256: &str = "S256";

const AUTHORIZATION_CODE_BYTES: usize = 32;

/// Space separated scope string to a de-duplicated list. Empty means defaults.
pub fn parse_scopes(scope: Option<&str>) -> Result<Vec<String>, ServiceError> {
    let requested: Vec<&str> = scope.unwrap_or("").split_whitespace().collect();
    if requested.is_empty() {
        return Ok(DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect());
    }

    let mut scopes: Vec<String> = Vec::with_capacity(requested.len());
    for s in requested {
        if !SUPPORTED_SCOPES.contains(&s) {
            return Err(ServiceError::invalid_grant(format!("unsupported scope '{}'", s)));
        }
        if !scopes.iter().any(|existing| existing == s) {
            scopes.push(s.to_string());
        }
    }
    Ok(scopes)
}

#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub grant_id: Uuid,
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: Option<String>,
    pub expires_in: i64,
    pub scope: String,
}

#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Introspection {
    pub active: bool,
    pub claims: Option<AccessTokenClaims>,
}

#[derive(Clone)]
pub struct TokenAuthority {
    store: Arc<dyn Store>,
    jwt: Arc<JwtService>,
    credentials: CredentialStore,
    tenants: TenantDirectory,
    code_ttl: Duration,
}

impl TokenAuthority {
    pub fn new(store: Arc<dyn Store>, jwt: Arc<JwtService>, code_ttl_seconds: i64) -> Self {
        Self {
            credentials: CredentialStore::new(store.clone()),
            tenants: TenantDirectory::new(store.clone()),
            store,
            jwt,
            code_ttl: Duration::seconds(code_ttl_seconds),
        }
    }

    /// Open a new grant for an already authenticated user and mint its tokens.
    pub async fn issue(
        &self,
        user: &User,
        client_id: Option<&str>,
        scopes: Vec<String>,
    ) -> Result<IssuedTokens, ServiceError> {
        let grant_id = Uuid::new_v4();
        let refresh_token = self.jwt.generate_refresh_token(user.user_id, grant_id)?;

        let grant = Grant::new(
            grant_id,
            user.user_id,
            user.tenant_id,
            client_id.map(str::to_string),
            scopes,
            user.security_stamp.clone(),
            sha256_hex(&refresh_token),
            self.jwt.refresh_token_lifetime(),
        );
        self.store.insert_grant(&grant).await?;

        tracing::info!(
            user_id = %user.user_id,
            tenant_id = %user.tenant_id,
            grant_id = %grant_id,
            client_id = client_id.unwrap_or("-"),
            "Grant issued"
        );

        self.mint(user, &grant, refresh_token).await
    }

    async fn mint(
        &self,
        user: &User,
        grant: &Grant,
        refresh_token: String,
    ) -> Result<IssuedTokens, ServiceError> {
        let roles = self.credentials.roles_for(user.user_id).await?;
        let scope = grant.scopes.join(" ");

        let access_token = self.jwt.generate_access_token(
            user.user_id,
            user.tenant_id,
            &roles,
            &scope,
            grant.grant_id,
        )?;

        let id_token = if grant.scopes.iter().any(|s| s == "openid") {
            let audience = grant.client_id.as_deref().unwrap_or(self.jwt.issuer());
            Some(self.jwt.generate_id_token(user, audience, &grant.scopes)?)
        } else {
            None
        };

        Ok(IssuedTokens {
            grant_id: grant.grant_id,
            access_token,
            refresh_token,
            id_token,
            expires_in: self.jwt.access_token_expiry_seconds(),
            scope,
        })
    }

    /// Client and redirect checks shared by the authorize step. Run before
    /// authenticating so a bad redirect never triggers a login OTP.
    pub async fn validate_authorize_request(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<Client, ServiceError> {
        let client = self
            .store
            .find_client(&request.client_id)
            .await?
            .ok_or_else(|| ServiceError::invalid_grant("unknown client"))?;

        if !client.allows_redirect(&request.redirect_uri) {
            return Err(ServiceError::invalid_grant("redirect_uri is not registered"));
        }

        if request.code_challenge_method != PKCE_METHOD_S256 {
            return Err(ServiceError::invalid_grant("code_challenge_method must be S256"));
        }

        if !is_valid_pkce_value(&request.code_challenge) {
            return Err(ServiceError::invalid_grant("malformed code_challenge"));
        }

        Ok(client)
    }

    /// Mint a single-use authorization code. Returns the raw code; only its
    /// hash is stored.
    pub async fn authorize(
        &self,
        tenant: &Tenant,
        user: &User,
        request: &AuthorizeRequest,
    ) -> Result<String, ServiceError> {
        self.validate_authorize_request(request).await?;

        if user.tenant_id != tenant.tenant_id {
            return Err(ServiceError::CrossTenantAccess);
        }

        let code = random_urlsafe(AUTHORIZATION_CODE_BYTES);
        let record = AuthorizationCode::new(
            sha256_hex(&code),
            request.client_id.clone(),
            tenant.tenant_id,
            user.user_id,
            request.redirect_uri.clone(),
            request.code_challenge.clone(),
            request.code_challenge_method.clone(),
            request.scopes.clone(),
            self.code_ttl,
        );
        self.store.insert_authorization_code(&record).await?;

        tracing::info!(
            user_id = %user.user_id,
            client_id = %request.client_id,
            "Authorization code issued"
        );
        Ok(code)
    }

    /// Redeem a code. The code is consumed before anything else is checked, so
    /// a failed exchange burns it.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<IssuedTokens, ServiceError> {
        let now = Utc::now();
        let record = self
            .store
            .consume_authorization_code(&sha256_hex(code), now)
            .await?
            .ok_or_else(|| ServiceError::invalid_grant("invalid authorization code"))?;

        if record.is_expired_at(now) {
            return Err(ServiceError::invalid_grant("authorization code expired"));
        }

        if record.client_id != client_id || record.redirect_uri != redirect_uri {
            tracing::warn!(client_id = %client_id, "Authorization code presented by wrong client");
            return Err(ServiceError::invalid_grant("client or redirect_uri mismatch"));
        }

        if !is_valid_pkce_value(code_verifier)
            || !constant_time_eq(&pkce_s256_challenge(code_verifier), &record.code_challenge)
        {
            tracing::warn!(user_id = %record.user_id, "PKCE verification failed");
            return Err(ServiceError::invalid_grant("code_verifier does not match"));
        }

        let user = self
            .store
            .find_user_by_id(record.user_id)
            .await?
            .filter(|u| u.is_active && u.tenant_id == record.tenant_id)
            .ok_or_else(|| ServiceError::invalid_grant("user is no longer active"))?;

        self.ensure_tenant_active(user.tenant_id)
            .await
            .map_err(|_| ServiceError::invalid_grant("tenant is no longer active"))?;

        self.issue(&user, Some(client_id), record.scopes).await
    }

    /// Rotate a refresh token. Any failure, including losing a concurrent
    /// rotation, is `InvalidOrRevokedToken`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, ServiceError> {
        let claims = self.jwt.validate_refresh_token(refresh_token).map_err(|e| {
            tracing::debug!("Refresh token rejected: {}", e);
            ServiceError::InvalidOrRevokedToken
        })?;

        let grant_id = parse_uuid(&claims.sid)?;
        let now = Utc::now();

        let grant = self
            .store
            .find_grant(grant_id)
            .await?
            .filter(|g| g.is_active_at(now))
            .ok_or(ServiceError::InvalidOrRevokedToken)?;

        let presented_hash = sha256_hex(refresh_token);
        if !constant_time_eq(&grant.refresh_token_hash, &presented_hash)
            || claims.sub != grant.user_id.to_string()
        {
            tracing::warn!(grant_id = %grant_id, "Stale refresh token presented");
            return Err(ServiceError::InvalidOrRevokedToken);
        }

        let user = self.live_user_for(&grant).await?;

        let new_refresh_token = self.jwt.generate_refresh_token(user.user_id, grant_id)?;
        let new_expiry = now + self.jwt.refresh_token_lifetime();

        let rotated = self
            .store
            .rotate_refresh_token(
                grant_id,
                &presented_hash,
                &sha256_hex(&new_refresh_token),
                new_expiry,
                now,
            )
            .await?;

        if !rotated {
            tracing::warn!(grant_id = %grant_id, "Lost refresh rotation race");
            return Err(ServiceError::InvalidOrRevokedToken);
        }

        tracing::info!(user_id = %user.user_id, grant_id = %grant_id, "Refresh token rotated");
        self.mint(&user, &grant, new_refresh_token).await
    }

    /// Signature and expiry, then grant liveness and stamp. Every failure is
    /// the same error.
    pub async fn validate_access_token(
        &self,
        token: &str,
    ) -> Result<AccessTokenClaims, ServiceError> {
        let claims = self.jwt.validate_access_token(token).map_err(|e| {
            tracing::debug!("Access token rejected: {}", e);
            ServiceError::InvalidOrRevokedToken
        })?;

        let grant_id = parse_uuid(&claims.sid)?;
        let grant = self
            .store
            .find_grant(grant_id)
            .await?
            .filter(|g| g.is_active_at(Utc::now()))
            .ok_or(ServiceError::InvalidOrRevokedToken)?;

        if claims.sub != grant.user_id.to_string() || claims.tenant_id != grant.tenant_id.to_string() {
            return Err(ServiceError::InvalidOrRevokedToken);
        }

        self.live_user_for(&grant).await?;
        Ok(claims)
    }

    /// Only registered clients may introspect.
    pub async fn introspect(
        &self,
        client_id: &str,
        token: &str,
    ) -> Result<Introspection, ServiceError> {
        if self.store.find_client(client_id).await?.is_none() {
            tracing::warn!(client_id = %client_id, "Introspection by unknown client");
            return Err(ServiceError::InvalidClient);
        }
        match self.validate_access_token(token).await {
            Ok(claims) => Ok(Introspection {
                active: true,
                claims: Some(claims),
            }),
            Err(ServiceError::InvalidOrRevokedToken) => Ok(Introspection::default()),
            Err(e) => Err(e),
        }
    }

    /// Revoke every live grant of the user in one conditional update.
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let count = self.store.revoke_grants_for_user(user_id, Utc::now()).await?;
        tracing::info!(user_id = %user_id, count, "All grants revoked");
        Ok(count)
    }

    pub async fn revoke_grant(&self, grant_id: Uuid) -> Result<bool, ServiceError> {
        let revoked = self.store.revoke_grant(grant_id, Utc::now()).await?;
        if revoked {
            tracing::info!(grant_id = %grant_id, "Grant revoked");
        }
        Ok(revoked)
    }

    /// User must be active, in an active tenant, with the stamp the grant was
    /// issued under.
    async fn live_user_for(&self, grant: &Grant) -> Result<User, ServiceError> {
        let user = self
            .store
            .find_user_by_id(grant.user_id)
            .await?
            .ok_or(ServiceError::InvalidOrRevokedToken)?;

        if !user.is_active || !constant_time_eq(&user.security_stamp, &grant.security_stamp) {
            return Err(ServiceError::InvalidOrRevokedToken);
        }

        self.ensure_tenant_active(user.tenant_id)
            .await
            .map_err(|_| ServiceError::InvalidOrRevokedToken)?;

        Ok(user)
    }

    async fn ensure_tenant_active(&self, tenant_id: Uuid) -> Result<(), ServiceError> {
        match self.tenants.find_by_id(tenant_id).await? {
            Some(tenant) if tenant.is_active => Ok(()),
            _ => Err(ServiceError::InactiveTenant),
        }
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(value).map_err(|_| ServiceError::InvalidOrRevokedToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_scope_uses_defaults() {
        assert_eq!(parse_scopes(None).unwrap(), vec!["openid", "roles", "offline_access"]);
        assert_eq!(parse_scopes(Some("  ")).unwrap(), vec!["openid", "roles", "offline_access"]);
    }

    #[test]
    fn test_scopes_deduplicated_in_order() {
        assert_eq!(
            parse_scopes(Some("email openid email")).unwrap(),
            vec!["email", "openid"]
        );
    }

    #[test]
    fn test_unknown_scope_is_invalid_grant() {
        assert!(matches!(
            parse_scopes(Some("openid admin")),
            Err(ServiceError::InvalidGrant(_))
        ));
    }
}
