//! The expiration policy store: cache-first reads, write-through
//! invalidation.
//!
//! Policies are read on every reservation creation and on every processor
//! tick but change rarely, so lookups go through an in-process moka cache
//! with a bounded TTL. The cache is strictly a side-channel optimization:
//! [`PolicyStore::disabled`] (always-miss) is a supported configuration and
//! every cache failure degrades to a direct store read. Administrative
//! writes invalidate both key shapes synchronously before returning.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use sqlx::PgConnection;

use crate::db::handlers::{ExpirationPolicies, Repository};
use crate::db::models::policies::{ExpirationPolicy, PolicyCreateRequest, PolicyUpdateRequest};
use crate::errors::Result;
use crate::types::{BusinessId, PolicyId, ServiceTypeId};

/// Default bound on cached policy entries.
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Default cache entry lifetime; writes invalidate sooner.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct PolicyStore {
    cache: Option<Cache<String, Arc<ExpirationPolicy>>>,
}

impl PolicyStore {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .support_invalidation_closures()
            .build();
        Self { cache: Some(cache) }
    }

    /// The always-miss configuration: every lookup is a direct store read.
    pub fn disabled() -> Self {
        Self { cache: None }
    }

    fn business_key(business_id: BusinessId, service_type: Option<ServiceTypeId>) -> String {
        match service_type {
            Some(service_type) => format!("business:{business_id}:{service_type}"),
            None => format!("business:{business_id}:-"),
        }
    }

    fn policy_key(id: PolicyId) -> String {
        format!("policy:{id}")
    }

    /// The active policy governing a (business, optional service type)
    /// scope, cache-first.
    pub async fn active_for_business(
        &self,
        db: &mut PgConnection,
        business_id: BusinessId,
        service_type: Option<ServiceTypeId>,
    ) -> Result<Option<Arc<ExpirationPolicy>>> {
        let key = Self::business_key(business_id, service_type);
        if let Some(cache) = &self.cache {
            if let Some(policy) = cache.get(&key).await {
                tracing::debug!(%business_id, "Policy cache hit");
                return Ok(Some(policy));
            }
        }

        let policy = ExpirationPolicies::new(db).find_active_for_business(business_id, service_type).await?;
        match policy {
            Some(policy) => {
                let policy = Arc::new(policy);
                if let Some(cache) = &self.cache {
                    cache.insert(key, policy.clone()).await;
                }
                Ok(Some(policy))
            }
            None => Ok(None),
        }
    }

    /// Look up one policy by id, cache-first.
    pub async fn by_id(&self, db: &mut PgConnection, id: PolicyId) -> Result<Option<Arc<ExpirationPolicy>>> {
        let key = Self::policy_key(id);
        if let Some(cache) = &self.cache {
            if let Some(policy) = cache.get(&key).await {
                return Ok(Some(policy));
            }
        }

        let policy = ExpirationPolicies::new(db).get_by_id(id).await?;
        match policy {
            Some(policy) => {
                let policy = Arc::new(policy);
                if let Some(cache) = &self.cache {
                    cache.insert(key, policy.clone()).await;
                }
                Ok(Some(policy))
            }
            None => Ok(None),
        }
    }

    pub async fn create_policy(&self, db: &mut PgConnection, request: &PolicyCreateRequest) -> Result<ExpirationPolicy> {
        let policy = ExpirationPolicies::new(db).create(request).await?;
        self.invalidate(&policy).await;
        Ok(policy)
    }

    pub async fn update_policy(&self, db: &mut PgConnection, id: PolicyId, request: &PolicyUpdateRequest) -> Result<ExpirationPolicy> {
        let policy = ExpirationPolicies::new(db).update(id, request).await?;
        self.invalidate(&policy).await;
        Ok(policy)
    }

    /// Soft-deactivate; the row is retained for historical linkage.
    pub async fn deactivate_policy(&self, db: &mut PgConnection, id: PolicyId) -> Result<ExpirationPolicy> {
        let policy = ExpirationPolicies::new(db).deactivate(id).await?;
        self.invalidate(&policy).await;
        Ok(policy)
    }

    /// Hard delete; refused while the policy still governs live reservations.
    pub async fn delete_policy(&self, db: &mut PgConnection, id: PolicyId) -> Result<bool> {
        let existing = ExpirationPolicies::new(db).get_by_id(id).await?;
        let deleted = ExpirationPolicies::new(db).delete(id).await?;
        if let Some(policy) = existing {
            self.invalidate(&policy).await;
        }
        Ok(deleted)
    }

    /// Drop both key shapes for a policy. Invalidation failures are logged
    /// and swallowed; the TTL bounds any staleness they could cause.
    async fn invalidate(&self, policy: &ExpirationPolicy) {
        let Some(cache) = &self.cache else { return };

        cache.invalidate(&Self::policy_key(policy.id)).await;

        // Every (business, service type) view of this business may now
        // resolve differently; drop them all.
        let prefix = format!("business:{}:", policy.business_id);
        if let Err(e) = cache.invalidate_entries_if(move |key, _| key.starts_with(&prefix)) {
            tracing::warn!(error = %e, policy_id = %policy.id, "Policy cache invalidation failed");
        }
    }
}
