//! PostgreSQL pool and embedded migrations.

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        max_connections = config.max_connections,
        "Connecting to PostgreSQL"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!("Connected to PostgreSQL");
    Ok(pool)
}

/// Apply the migrations under `passport-service/migrations`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Grant, Role, Tenant, User};
    use crate::store::{GrantRepository, PgStore, TenantRepository, UserRepository};
    use chrono::{Duration as ChronoDuration, Utc};
    use uuid::Uuid;

    fn test_config() -> DatabaseConfig {
        DatabaseConfig {
            url: std::env::var("TEST_DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/passport_test".to_string()),
            max_connections: 5,
            min_connections: 1,
        }
    }

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_migrations_and_refresh_rotation() {
        let pool = create_pool(&test_config()).await.unwrap();
        run_migrations(&pool).await.unwrap();
        health_check(&pool).await.unwrap();

        let store = PgStore::new(pool);
        let slug = format!("t-{}", &Uuid::new_v4().simple().to_string()[..12]);
        let tenant = Tenant::new("Test".into(), slug);
        store.insert_tenant(&tenant).await.unwrap();

        let user = User::new(tenant.tenant_id, "alice".into(), None);
        store.insert_user(&user, &[Role::User]).await.unwrap();
        assert_eq!(store.find_roles(user.user_id).await.unwrap(), vec![Role::User]);

        let grant = Grant::new(
            Uuid::new_v4(),
            user.user_id,
            tenant.tenant_id,
            None,
            vec!["openid".into()],
            user.security_stamp.clone(),
            "a".repeat(64),
            ChronoDuration::days(1),
        );
        store.insert_grant(&grant).await.unwrap();

        let now = Utc::now();
        let expiry = now + ChronoDuration::days(1);
        let hash_a = "a".repeat(64);
        let hash_b = "b".repeat(64);
        let hash_c = "c".repeat(64);
        assert!(store
            .rotate_refresh_token(grant.grant_id, &hash_a, &hash_b, expiry, now)
            .await
            .unwrap());
        assert!(!store
            .rotate_refresh_token(grant.grant_id, &hash_a, &hash_c, expiry, now)
            .await
            .unwrap());
    }
}
