//! Database repository for business expiration policies.

use std::collections::HashMap;

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::{DbError, Result};
use crate::db::handlers::repository::Repository;
use crate::db::models::policies::{ExpirationPolicy, PolicyCreateRequest, PolicyFilter, PolicyUpdateRequest};
use crate::types::{BusinessId, PolicyId, ServiceTypeId};

const POLICY_COLUMNS: &str = "id, business_id, name, default_ttl_minutes, warning_intervals, grace_period_minutes, \
     auto_cleanup, notify_warnings, notify_expired, notify_business, service_type_scope, is_active, created_at, updated_at";

/// Bounds mirrored from the table's check constraints; the warning schedule
/// rules can only be enforced here since they relate columns to array
/// content.
const TTL_MINUTES_RANGE: std::ops::RangeInclusive<i32> = 5..=10080;
const GRACE_MINUTES_RANGE: std::ops::RangeInclusive<i32> = 0..=1440;
const MAX_WARNING_INTERVALS: usize = 5;

pub struct ExpirationPolicies<'c> {
    db: &'c mut PgConnection,
}

/// Normalize a warning schedule: dedup, sort descending (earliest warning
/// first), and reject schedules the TTL cannot accommodate.
fn normalize_warning_intervals(default_ttl_minutes: i32, intervals: &[i32]) -> Result<Vec<i32>> {
    let mut intervals: Vec<i32> = intervals.to_vec();
    intervals.sort_unstable_by(|a, b| b.cmp(a));
    intervals.dedup();

    if intervals.len() > MAX_WARNING_INTERVALS {
        return Err(check_violation(format!(
            "at most {MAX_WARNING_INTERVALS} warning intervals are allowed, got {}",
            intervals.len()
        )));
    }
    if let Some(bad) = intervals.iter().find(|w| **w < 1 || **w >= default_ttl_minutes) {
        return Err(check_violation(format!(
            "warning interval {bad} must be between 1 and the default TTL ({default_ttl_minutes} minutes, exclusive)"
        )));
    }

    Ok(intervals)
}

fn validate_policy_bounds(default_ttl_minutes: i32, grace_period_minutes: i32) -> Result<()> {
    if !TTL_MINUTES_RANGE.contains(&default_ttl_minutes) {
        return Err(check_violation(format!(
            "default_ttl_minutes must be within {TTL_MINUTES_RANGE:?}, got {default_ttl_minutes}"
        )));
    }
    if !GRACE_MINUTES_RANGE.contains(&grace_period_minutes) {
        return Err(check_violation(format!(
            "grace_period_minutes must be within {GRACE_MINUTES_RANGE:?}, got {grace_period_minutes}"
        )));
    }
    Ok(())
}

fn check_violation(message: String) -> DbError {
    DbError::CheckViolation {
        constraint: Some("expiration_policies_warning_schedule".to_string()),
        table: Some("expiration_policies".to_string()),
        message,
    }
}

#[async_trait::async_trait]
impl<'c> Repository for ExpirationPolicies<'c> {
    type CreateRequest = PolicyCreateRequest;
    type UpdateRequest = PolicyUpdateRequest;
    type Response = ExpirationPolicy;
    type Id = PolicyId;
    type Filter = PolicyFilter;

    #[instrument(skip(self, request), fields(business_id = %request.business_id, name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        validate_policy_bounds(request.default_ttl_minutes, request.grace_period_minutes)?;
        let intervals = normalize_warning_intervals(request.default_ttl_minutes, &request.warning_intervals)?;

        let policy = sqlx::query_as::<_, ExpirationPolicy>(&format!(
            r#"
            INSERT INTO expiration_policies
                (business_id, name, default_ttl_minutes, warning_intervals, grace_period_minutes,
                 auto_cleanup, notify_warnings, notify_expired, notify_business, service_type_scope)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {POLICY_COLUMNS}
            "#
        ))
        .bind(request.business_id)
        .bind(&request.name)
        .bind(request.default_ttl_minutes)
        .bind(&intervals)
        .bind(request.grace_period_minutes)
        .bind(request.auto_cleanup)
        .bind(request.notify_warnings)
        .bind(request.notify_expired)
        .bind(request.notify_business)
        .bind(&request.service_type_scope)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(policy)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let policy = sqlx::query_as::<_, ExpirationPolicy>(&format!("SELECT {POLICY_COLUMNS} FROM expiration_policies WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(policy)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    async fn get_bulk(&mut self, ids: Vec<Self::Id>) -> Result<HashMap<Self::Id, Self::Response>> {
        let policies =
            sqlx::query_as::<_, ExpirationPolicy>(&format!("SELECT {POLICY_COLUMNS} FROM expiration_policies WHERE id = ANY($1)"))
                .bind(&ids)
                .fetch_all(&mut *self.db)
                .await?;

        Ok(policies.into_iter().map(|p| (p.id, p)).collect())
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = format!("SELECT {POLICY_COLUMNS} FROM expiration_policies WHERE 1=1");

        if filter.business_id.is_some() {
            query.push_str(" AND business_id = $1");
        }
        if filter.active_only {
            query.push_str(" AND is_active");
        }
        query.push_str(&format!(" ORDER BY created_at DESC LIMIT {} OFFSET {}", filter.limit, filter.skip));

        let mut sql_query = sqlx::query_as::<_, ExpirationPolicy>(&query);
        if let Some(business_id) = filter.business_id {
            sql_query = sql_query.bind(business_id);
        }

        let policies = sql_query.fetch_all(&mut *self.db).await?;
        Ok(policies)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let existing = self.get_by_id(id).await?.ok_or(DbError::NotFound)?;

        let default_ttl_minutes = request.default_ttl_minutes.unwrap_or(existing.default_ttl_minutes);
        let grace_period_minutes = request.grace_period_minutes.unwrap_or(existing.grace_period_minutes);
        validate_policy_bounds(default_ttl_minutes, grace_period_minutes)?;

        let intervals = normalize_warning_intervals(
            default_ttl_minutes,
            request.warning_intervals.as_deref().unwrap_or(&existing.warning_intervals),
        )?;

        let service_type_scope = match &request.service_type_scope {
            Some(scope) => scope.clone(),
            None => existing.service_type_scope.clone(),
        };

        let policy = sqlx::query_as::<_, ExpirationPolicy>(&format!(
            r#"
            UPDATE expiration_policies
            SET name = $2,
                default_ttl_minutes = $3,
                warning_intervals = $4,
                grace_period_minutes = $5,
                auto_cleanup = $6,
                notify_warnings = $7,
                notify_expired = $8,
                notify_business = $9,
                service_type_scope = $10,
                is_active = $11,
                updated_at = now()
            WHERE id = $1
            RETURNING {POLICY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(request.name.as_ref().unwrap_or(&existing.name))
        .bind(default_ttl_minutes)
        .bind(&intervals)
        .bind(grace_period_minutes)
        .bind(request.auto_cleanup.unwrap_or(existing.auto_cleanup))
        .bind(request.notify_warnings.unwrap_or(existing.notify_warnings))
        .bind(request.notify_expired.unwrap_or(existing.notify_expired))
        .bind(request.notify_business.unwrap_or(existing.notify_business))
        .bind(&service_type_scope)
        .bind(request.is_active.unwrap_or(existing.is_active))
        .fetch_one(&mut *self.db)
        .await?;

        Ok(policy)
    }

    /// Hard deletion is refused while the policy's business still has live
    /// reservations depending on it; use [`ExpirationPolicies::deactivate`]
    /// instead, which retains the row for historical linkage.
    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let in_use = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM reservation_ttls t
                JOIN reservations r ON r.id = t.reservation_id
                WHERE t.status IN ('active', 'warned')
                  AND r.business_id = (SELECT business_id FROM expiration_policies WHERE id = $1)
            )
            "#,
        )
        .bind(id)
        .fetch_one(&mut *self.db)
        .await?;

        if in_use {
            return Err(DbError::ProtectedEntity {
                operation: "delete".to_string(),
                reason: "policy still governs in-flight reservations".to_string(),
                entity_type: "expiration policy".to_string(),
                entity_id: Some(id.to_string()),
            });
        }

        let result = sqlx::query("DELETE FROM expiration_policies WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl<'c> ExpirationPolicies<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// The single active policy governing a (business, optional service type)
    /// scope. A policy scoped to the reservation's service type wins over a
    /// business-wide one.
    #[instrument(skip(self), err)]
    pub async fn find_active_for_business(
        &mut self,
        business_id: BusinessId,
        service_type: Option<ServiceTypeId>,
    ) -> Result<Option<ExpirationPolicy>> {
        let policy = sqlx::query_as::<_, ExpirationPolicy>(&format!(
            r#"
            SELECT {POLICY_COLUMNS} FROM expiration_policies
            WHERE business_id = $1 AND is_active
              AND (service_type_scope IS NULL OR ($2::uuid IS NOT NULL AND $2 = ANY(service_type_scope)))
            ORDER BY (service_type_scope IS NOT NULL) DESC, updated_at DESC
            LIMIT 1
            "#
        ))
        .bind(business_id)
        .bind(service_type)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(policy)
    }

    /// Soft-deactivate a policy. Always allowed: in-flight reservations keep
    /// their historical linkage, the policy just stops governing new ones.
    #[instrument(skip(self), err)]
    pub async fn deactivate(&mut self, id: PolicyId) -> Result<ExpirationPolicy> {
        let policy = sqlx::query_as::<_, ExpirationPolicy>(&format!(
            "UPDATE expiration_policies SET is_active = FALSE, updated_at = now() WHERE id = $1 RETURNING {POLICY_COLUMNS}"
        ))
        .bind(id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(policy)
    }

    /// Active policies currently governing at least one live (`active` or
    /// `warned`) reservation, resolved through the reservations' business
    /// linkage. The processor's warning pass iterates exactly these.
    #[instrument(skip(self), err)]
    pub async fn policies_in_use(&mut self, business_id: Option<BusinessId>) -> Result<Vec<ExpirationPolicy>> {
        let policies = sqlx::query_as::<_, ExpirationPolicy>(&format!(
            r#"
            SELECT DISTINCT {POLICY_COLUMNS} FROM expiration_policies p
            WHERE p.is_active
              AND ($1::uuid IS NULL OR p.business_id = $1)
              AND EXISTS (
                  SELECT 1
                  FROM reservation_ttls t
                  JOIN reservations r ON r.id = t.reservation_id
                  WHERE r.business_id = p.business_id AND t.status IN ('active', 'warned')
              )
            ORDER BY created_at
            "#
        ))
        .bind(business_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(policies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::handlers::ReservationTtls;
    use crate::test_utils::{create_test_policy, create_test_reservation};
    use chrono::{Duration, Utc};
    use sqlx::PgPool;
    use uuid::Uuid;

    #[sqlx::test]
    #[test_log::test]
    async fn test_policy_name_unique_per_business(pool: PgPool) {
        let business = Uuid::new_v4();
        let mut conn = pool.acquire().await.unwrap();
        let mut policies = ExpirationPolicies::new(&mut conn);

        let request = PolicyCreateRequest {
            business_id: business,
            name: "standard".to_string(),
            default_ttl_minutes: 30,
            ..Default::default()
        };
        policies.create(&request).await.unwrap();

        let err = policies.create(&request).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        // Same name under another business is fine
        let request = PolicyCreateRequest {
            business_id: Uuid::new_v4(),
            ..request
        };
        policies.create(&request).await.unwrap();
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_warning_schedule_validation(pool: PgPool) {
        let business = Uuid::new_v4();
        let mut conn = pool.acquire().await.unwrap();
        let mut policies = ExpirationPolicies::new(&mut conn);

        let err = policies
            .create(&PolicyCreateRequest {
                business_id: business,
                name: "too-many".to_string(),
                default_ttl_minutes: 120,
                warning_intervals: vec![5, 10, 15, 20, 25, 30],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::CheckViolation { .. }));

        let err = policies
            .create(&PolicyCreateRequest {
                business_id: business,
                name: "interval-beyond-ttl".to_string(),
                default_ttl_minutes: 30,
                warning_intervals: vec![60],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::CheckViolation { .. }));

        // Duplicates collapse and the schedule is stored descending
        let policy = policies
            .create(&PolicyCreateRequest {
                business_id: business,
                name: "normalized".to_string(),
                default_ttl_minutes: 120,
                warning_intervals: vec![15, 60, 15],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(policy.warning_intervals, vec![60, 15]);
        assert_eq!(policy.intervals_ascending(), vec![15, 60]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_service_type_scoped_policy_wins(pool: PgPool) {
        let business = Uuid::new_v4();
        let service_type = Uuid::new_v4();
        let mut conn = pool.acquire().await.unwrap();
        let mut policies = ExpirationPolicies::new(&mut conn);

        let wide = policies
            .create(&PolicyCreateRequest {
                business_id: business,
                name: "business-wide".to_string(),
                default_ttl_minutes: 30,
                ..Default::default()
            })
            .await
            .unwrap();
        let scoped = policies
            .create(&PolicyCreateRequest {
                business_id: business,
                name: "scoped".to_string(),
                default_ttl_minutes: 60,
                service_type_scope: Some(vec![service_type]),
                ..Default::default()
            })
            .await
            .unwrap();

        let found = policies.find_active_for_business(business, None).await.unwrap().unwrap();
        assert_eq!(found.id, wide.id);

        let found = policies.find_active_for_business(business, Some(service_type)).await.unwrap().unwrap();
        assert_eq!(found.id, scoped.id);

        // A service type outside the scope falls back to the wide policy
        let found = policies
            .find_active_for_business(business, Some(Uuid::new_v4()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, wide.id);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_deactivated_policy_stops_governing(pool: PgPool) {
        let business = Uuid::new_v4();
        let policy = create_test_policy(&pool, business, |_| {}).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut policies = ExpirationPolicies::new(&mut conn);

        policies.deactivate(policy.id).await.unwrap();
        assert!(policies.find_active_for_business(business, None).await.unwrap().is_none());

        // The row itself is retained
        assert!(policies.get_by_id(policy.id).await.unwrap().is_some());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_delete_refused_while_in_use(pool: PgPool) {
        let business = Uuid::new_v4();
        let policy = create_test_policy(&pool, business, |_| {}).await;
        let reservation = create_test_reservation(&pool, business).await;

        let mut conn = pool.acquire().await.unwrap();
        ReservationTtls::new(&mut conn)
            .upsert(reservation.id, Utc::now() + Duration::minutes(30))
            .await
            .unwrap();

        let mut policies = ExpirationPolicies::new(&mut conn);
        let err = policies.delete(policy.id).await.unwrap_err();
        assert!(matches!(err, DbError::ProtectedEntity { .. }));

        let in_use = policies.policies_in_use(Some(business)).await.unwrap();
        assert_eq!(in_use.len(), 1);
        assert_eq!(in_use[0].id, policy.id);
    }
}
