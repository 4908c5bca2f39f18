//! PostgreSQL row store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use super::{
    AuthorizationCodeRepository, ClientRepository, GrantRepository, Store, TenantRepository,
    TrustedDeviceRepository, UserRepository, VerificationTokenRepository,
};
use crate::models::{
    role::parse_roles, AuthorizationCode, Client, Grant, Role, Tenant, TokenKind, TrustedDevice,
    User, VerificationToken,
};
use crate::services::error::{map_unique_violation, ServiceError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TenantRepository for PgStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_id, tenant_name, tenant_slug, is_active, custom_domain, subdomain_slug, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.tenant_name)
        .bind(&tenant.tenant_slug)
        .bind(tenant.is_active)
        .bind(&tenant.custom_domain)
        .bind(&tenant.subdomain_slug)
        .bind(tenant.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "Tenant"))?;
        Ok(())
    }

    async fn find_tenant_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> Result<Option<Tenant>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_tenant_by_custom_domain(
        &self,
        domain: &str,
    ) -> Result<Option<Tenant>, ServiceError> {
        Ok(sqlx::query_as::<_, Tenant>(
            "SELECT * FROM tenants WHERE LOWER(custom_domain) = LOWER($1)",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_tenant_by_subdomain(&self, label: &str) -> Result<Option<Tenant>, ServiceError> {
        Ok(sqlx::query_as::<_, Tenant>(
            "SELECT * FROM tenants WHERE LOWER(subdomain_slug) = LOWER($1)",
        )
        .bind(label)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Tenant>("SELECT * FROM tenants ORDER BY tenant_slug")
                .fetch_all(&self.pool)
                .await?,
        )
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn insert_user(&self, user: &User, roles: &[Role]) -> Result<(), ServiceError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO users (
                user_id, tenant_id, username, email, display_name, password_hash,
                phone_number, phone_confirmed, two_factor_enabled, email_confirmed,
                is_active, security_stamp, last_logout_utc, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(user.user_id)
        .bind(user.tenant_id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(&user.phone_number)
        .bind(user.phone_confirmed)
        .bind(user.two_factor_enabled)
        .bind(user.email_confirmed)
        .bind(user.is_active)
        .bind(&user.security_stamp)
        .bind(user.last_logout_utc)
        .bind(user.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, "User"))?;

        for role in roles {
            sqlx::query("INSERT INTO user_roles (user_id, role_code) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(user.user_id)
                .bind(role.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn find_user_by_username(
        &self,
        tenant_id: Uuid,
        username: &str,
    ) -> Result<Option<User>, ServiceError> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE tenant_id = $1 AND LOWER(username) = LOWER($2)",
        )
        .bind(tenant_id)
        .bind(username)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_user_by_email(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, ServiceError> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE tenant_id = $1 AND LOWER(email) = LOWER($2)",
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_users_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, ServiceError> {
        Ok(sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE tenant_id = $1 ORDER BY created_utc",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_roles(&self, user_id: Uuid) -> Result<Vec<Role>, ServiceError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT role_code FROM user_roles WHERE user_id = $1 ORDER BY role_code")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(parse_roles(rows.into_iter().map(|(code,)| code)))
    }

    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        security_stamp: &str,
    ) -> Result<(), ServiceError> {
        sqlx::query("UPDATE users SET password_hash = $2, security_stamp = $3 WHERE user_id = $1")
            .bind(user_id)
            .bind(password_hash)
            .bind(security_stamp)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn activate_with_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        security_stamp: &str,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2, security_stamp = $3, is_active = TRUE, email_confirmed = TRUE
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(password_hash)
        .bind(security_stamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rotate_security_stamp(
        &self,
        user_id: Uuid,
        security_stamp: &str,
        logout_utc: Option<DateTime<Utc>>,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET security_stamp = $2, last_logout_utc = COALESCE($3, last_logout_utc)
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(security_stamp)
        .bind(logout_utc)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_phone_two_factor(
        &self,
        user_id: Uuid,
        phone_number: Option<&str>,
        two_factor_enabled: bool,
        security_stamp: &str,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            UPDATE users
            SET phone_number = $2, phone_confirmed = $3, two_factor_enabled = $4, security_stamp = $5
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(phone_number)
        .bind(phone_number.is_some())
        .bind(two_factor_enabled)
        .bind(security_stamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TrustedDeviceRepository for PgStore {
    async fn insert_device(&self, device: &TrustedDevice) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO trusted_devices (device_id, user_id, token_hash, device_label, ip_address, trusted_utc, expiry_utc, is_revoked)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(device.device_id)
        .bind(device.user_id)
        .bind(&device.token_hash)
        .bind(&device.device_label)
        .bind(&device.ip_address)
        .bind(device.trusted_utc)
        .bind(device.expiry_utc)
        .bind(device.is_revoked)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "Device"))?;
        Ok(())
    }

    async fn find_device_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<TrustedDevice>, ServiceError> {
        Ok(sqlx::query_as::<_, TrustedDevice>(
            "SELECT * FROM trusted_devices WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_device(&self, device_id: Uuid) -> Result<Option<TrustedDevice>, ServiceError> {
        Ok(sqlx::query_as::<_, TrustedDevice>(
            "SELECT * FROM trusted_devices WHERE device_id = $1",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_active_devices(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrustedDevice>, ServiceError> {
        Ok(sqlx::query_as::<_, TrustedDevice>(
            r#"
            SELECT * FROM trusted_devices
            WHERE user_id = $1 AND is_revoked = FALSE AND expiry_utc > $2
            ORDER BY trusted_utc DESC
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn revoke_device(&self, device_id: Uuid) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            "UPDATE trusted_devices SET is_revoked = TRUE WHERE device_id = $1 AND is_revoked = FALSE",
        )
        .bind(device_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_devices_for_user(&self, user_id: Uuid) -> Result<u64, ServiceError> {
        let result = sqlx::query(
            "UPDATE trusted_devices SET is_revoked = TRUE WHERE user_id = $1 AND is_revoked = FALSE",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl GrantRepository for PgStore {
    async fn insert_grant(&self, grant: &Grant) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO grants (
                grant_id, user_id, tenant_id, client_id, scopes, security_stamp,
                refresh_token_hash, issued_utc, expiry_utc, rotated_utc, revoked_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(grant.grant_id)
        .bind(grant.user_id)
        .bind(grant.tenant_id)
        .bind(&grant.client_id)
        .bind(&grant.scopes)
        .bind(&grant.security_stamp)
        .bind(&grant.refresh_token_hash)
        .bind(grant.issued_utc)
        .bind(grant.expiry_utc)
        .bind(grant.rotated_utc)
        .bind(grant.revoked_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_grant(&self, grant_id: Uuid) -> Result<Option<Grant>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Grant>("SELECT * FROM grants WHERE grant_id = $1")
                .bind(grant_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn rotate_refresh_token(
        &self,
        grant_id: Uuid,
        expected_hash: &str,
        new_hash: &str,
        new_expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            r#"
            UPDATE grants
            SET refresh_token_hash = $3, expiry_utc = $4, rotated_utc = $5
            WHERE grant_id = $1
              AND refresh_token_hash = $2
              AND revoked_utc IS NULL
              AND expiry_utc > $5
            "#,
        )
        .bind(grant_id)
        .bind(expected_hash)
        .bind(new_hash)
        .bind(new_expiry)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_grant(&self, grant_id: Uuid, now: DateTime<Utc>) -> Result<bool, ServiceError> {
        let result = sqlx::query(
            "UPDATE grants SET revoked_utc = $2 WHERE grant_id = $1 AND revoked_utc IS NULL",
        )
        .bind(grant_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_grants_for_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let result = sqlx::query(
            "UPDATE grants SET revoked_utc = $2 WHERE user_id = $1 AND revoked_utc IS NULL",
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AuthorizationCodeRepository for PgStore {
    async fn insert_authorization_code(
        &self,
        code: &AuthorizationCode,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO authorization_codes (
                code_hash, client_id, tenant_id, user_id, redirect_uri, code_challenge,
                code_challenge_method, scopes, expiry_utc, consumed_utc, created_utc
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&code.code_hash)
        .bind(&code.client_id)
        .bind(code.tenant_id)
        .bind(code.user_id)
        .bind(&code.redirect_uri)
        .bind(&code.code_challenge)
        .bind(&code.code_challenge_method)
        .bind(&code.scopes)
        .bind(code.expiry_utc)
        .bind(code.consumed_utc)
        .bind(code.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume_authorization_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AuthorizationCode>, ServiceError> {
        Ok(sqlx::query_as::<_, AuthorizationCode>(
            r#"
            UPDATE authorization_codes
            SET consumed_utc = $2
            WHERE code_hash = $1 AND consumed_utc IS NULL
            RETURNING *
            "#,
        )
        .bind(code_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }
}

#[async_trait]
impl ClientRepository for PgStore {
    async fn insert_client(&self, client: &Client) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO clients (client_id, client_name, redirect_uris, created_utc)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&client.client_id)
        .bind(&client.client_name)
        .bind(&client.redirect_uris)
        .bind(client.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "Client"))?;
        Ok(())
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, ServiceError> {
        Ok(
            sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE client_id = $1")
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }
}

#[async_trait]
impl VerificationTokenRepository for PgStore {
    async fn insert_verification_token(
        &self,
        token: &VerificationToken,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO verification_tokens (token_id, user_id, token_kind, token_hash, expiry_utc, consumed_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(token.token_id)
        .bind(token.user_id)
        .bind(&token.token_kind)
        .bind(&token.token_hash)
        .bind(token.expiry_utc)
        .bind(token.consumed_utc)
        .bind(token.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume_verification_token(
        &self,
        user_id: Uuid,
        kind: TokenKind,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<VerificationToken>, ServiceError> {
        Ok(sqlx::query_as::<_, VerificationToken>(
            r#"
            UPDATE verification_tokens
            SET consumed_utc = $4
            WHERE user_id = $1
              AND token_kind = $2
              AND token_hash = $3
              AND consumed_utc IS NULL
              AND expiry_utc > $4
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn health_check(&self) -> Result<(), ServiceError> {
        crate::db::health_check(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            ServiceError::Database(e)
        })
    }

    async fn prune_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, ServiceError> {
        let mut removed = 0;
        for sql in [
            "DELETE FROM authorization_codes WHERE consumed_utc < $1 OR expiry_utc < $1",
            "DELETE FROM verification_tokens WHERE consumed_utc < $1 OR expiry_utc < $1",
            "DELETE FROM grants WHERE revoked_utc < $1 OR expiry_utc < $1",
        ] {
            removed += sqlx::query(sql)
                .bind(cutoff)
                .execute(&self.pool)
                .await?
                .rows_affected();
        }
        Ok(removed)
    }
}
