use std::sync::Arc;

use crate::models::Tenant;
use crate::services::ServiceError;
use crate::store::Store;

/// Resolves the tenant a request is for. Misses and inactive tenants are
/// both `None`.
#[derive(Clone)]
pub struct TenantDirectory {
    store: Arc<dyn Store>,
}

impl TenantDirectory {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn resolve_by_slug(&self, slug: &str) -> Result<Option<Tenant>, ServiceError> {
        let slug = slug.trim().to_lowercase();
        if slug.is_empty() {
            return Ok(None);
        }

        Ok(self
            .store
            .find_tenant_by_slug(&slug)
            .await?
            .filter(|t| t.is_active))
    }

    /// Custom domain first, then the first host label against subdomain slugs.
    pub async fn resolve_by_host(&self, host: &str) -> Result<Option<Tenant>, ServiceError> {
        let Some(host) = normalize_host(host) else {
            return Ok(None);
        };

        if let Some(tenant) = self.store.find_tenant_by_custom_domain(&host).await? {
            if tenant.is_active {
                return Ok(Some(tenant));
            }
        }

        let Some(label) = host.split('.').next().filter(|l| !l.is_empty()) else {
            return Ok(None);
        };

        Ok(self
            .store
            .find_tenant_by_subdomain(label)
            .await?
            .filter(|t| t.is_active))
    }

    /// Explicit slug hint wins over the host.
    pub async fn resolve(
        &self,
        tenant_hint: Option<&str>,
        host: Option<&str>,
    ) -> Result<Option<Tenant>, ServiceError> {
        if let Some(hint) = tenant_hint.filter(|h| !h.trim().is_empty()) {
            return self.resolve_by_slug(hint).await;
        }

        match host {
            Some(host) => self.resolve_by_host(host).await,
            None => Ok(None),
        }
    }

    pub async fn find_by_id(&self, tenant_id: uuid::Uuid) -> Result<Option<Tenant>, ServiceError> {
        self.store.find_tenant_by_id(tenant_id).await
    }
}

/// Lowercase and drop any `:port` suffix. Brackets around IPv6 literals are
/// removed.
pub fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        host.rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map(|(name, _)| name)
            .unwrap_or(host)
    };

    let normalized = without_port.trim_end_matches('.').to_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, TenantRepository};

    async fn directory() -> TenantDirectory {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_tenant(&Tenant::new("A".into(), "tenant-a".into()).with_custom_domain("a.example.com"))
            .await
            .unwrap();
        store
            .insert_tenant(&Tenant::new("B".into(), "tenant-b".into()).with_subdomain("b"))
            .await
            .unwrap();
        let mut inactive = Tenant::new("Z".into(), "tenant-z".into()).with_subdomain("z");
        inactive.is_active = false;
        store.insert_tenant(&inactive).await.unwrap();

        TenantDirectory::new(store)
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("B.Example.com:443").as_deref(), Some("b.example.com"));
        assert_eq!(normalize_host("a.example.com").as_deref(), Some("a.example.com"));
        assert_eq!(normalize_host("[::1]:8080").as_deref(), Some("::1"));
        assert_eq!(normalize_host("  "), None);
    }

    #[tokio::test]
    async fn test_host_resolution() {
        let dir = directory().await;

        let b = dir.resolve_by_host("b.example.com:443").await.unwrap().unwrap();
        assert_eq!(b.tenant_slug, "tenant-b");

        let a = dir.resolve_by_host("A.EXAMPLE.COM").await.unwrap().unwrap();
        assert_eq!(a.tenant_slug, "tenant-a");

        assert!(dir.resolve_by_host("c.example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_inactive_tenant_is_invisible() {
        let dir = directory().await;
        assert!(dir.resolve_by_host("z.example.com").await.unwrap().is_none());
        assert!(dir.resolve_by_slug("tenant-z").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_slug_hint_wins_over_host() {
        let dir = directory().await;
        let tenant = dir
            .resolve(Some("tenant-a"), Some("b.example.com"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tenant.tenant_slug, "tenant-a");

        let by_host = dir.resolve(None, Some("b.example.com")).await.unwrap().unwrap();
        assert_eq!(by_host.tenant_slug, "tenant-b");
    }
}
