//! The reservation orchestrator: the entry point reservation creation and
//! cancellation flows call into.
//!
//! Creation composes the base reservation insert, the inventory ledger's
//! reserve and the TTL tracker's upsert inside one transaction, so a
//! shortfall or storage fault leaves nothing behind.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::instrument;

use crate::db::errors::DbError;
use crate::db::handlers::{Inventory, Reservations, ReservationTtls};
use crate::db::models::inventory::{HoldStatus, InventoryHold, ItemRequest};
use crate::db::models::reservation_ttls::ReservationTtl;
use crate::db::models::reservations::{Reservation, ReservationCreateRequest};
use crate::errors::{Error, Result};
use crate::policy_store::PolicyStore;
use crate::types::{BusinessId, ReservationId, ServiceTypeId};

/// Hold duration applied when the caller does not pass one.
pub const DEFAULT_HOLD_DURATION_MINUTES: i32 = 30;

/// Hard TTL fallback when neither an explicit override nor an active policy
/// applies.
pub const FALLBACK_TTL_MINUTES: i32 = 30;

#[derive(Debug, Clone, Default)]
pub struct CreateReservationInput {
    pub business_id: BusinessId,
    pub service_type_id: Option<ServiceTypeId>,
    pub customer_ref: Option<String>,
    pub items: Vec<ItemRequest>,
    /// Overrides [`DEFAULT_HOLD_DURATION_MINUTES`] when set.
    pub hold_duration_minutes: Option<i32>,
    /// Overrides the policy-resolved TTL when set.
    pub ttl_minutes: Option<i32>,
}

/// Everything a creation call produced, returned together so callers can
/// render the confirmation screen without re-reading.
#[derive(Debug, Clone)]
pub struct CreatedReservation {
    pub reservation: Reservation,
    pub holds: Vec<InventoryHold>,
    pub ttl: ReservationTtl,
}

#[derive(Clone)]
pub struct BookingService {
    pool: PgPool,
    policies: PolicyStore,
}

impl BookingService {
    pub fn new(pool: PgPool, policies: PolicyStore) -> Self {
        Self { pool, policies }
    }

    /// Create a reservation: insert the base record, reserve the requested
    /// items and set the expiry, all-or-nothing.
    #[instrument(skip(self, input), fields(business_id = %input.business_id, items = input.items.len()), err)]
    pub async fn create_reservation(&self, input: CreateReservationInput) -> Result<CreatedReservation> {
        let mut tx = self.pool.begin().await?;

        let reservation = Reservations::new(&mut tx)
            .create(&ReservationCreateRequest {
                business_id: input.business_id,
                service_type_id: input.service_type_id,
                customer_ref: input.customer_ref.clone(),
            })
            .await?;

        let holds = if input.items.is_empty() {
            Vec::new()
        } else {
            Inventory::new(&mut tx)
                .reserve_items(
                    reservation.id,
                    &input.items,
                    input.hold_duration_minutes.unwrap_or(DEFAULT_HOLD_DURATION_MINUTES),
                )
                .await?
        };

        let ttl = self
            .resolve_and_set_ttl(&mut tx, reservation.id, input.ttl_minutes, input.business_id, input.service_type_id)
            .await?;

        tx.commit().await?;

        tracing::info!(
            reservation_id = %reservation.id,
            holds = holds.len(),
            expires_at = %ttl.expires_at,
            "Created reservation"
        );

        Ok(CreatedReservation { reservation, holds, ttl })
    }

    /// Cancel a reservation and release its holds. Unlike expiry, explicit
    /// cancellation also unwinds confirmed holds, returning sold stock.
    /// Rejected once the reservation is already cancelled or completed.
    #[instrument(skip(self, reason), err)]
    pub async fn cancel_reservation(&self, id: ReservationId, actor: &str, reason: Option<&str>) -> Result<Reservation> {
        let mut tx = self.pool.begin().await?;

        let reservation = match Reservations::new(&mut tx).cancel(id, actor, reason).await {
            Ok(reservation) => reservation,
            Err(DbError::NotFound) => {
                return Err(Error::NotFound {
                    resource: "reservation".to_string(),
                    id: id.to_string(),
                });
            }
            Err(DbError::ProtectedEntity { reason, .. }) => {
                return Err(Error::BadRequest { message: reason });
            }
            Err(e) => return Err(e.into()),
        };

        let released = Inventory::new(&mut tx).release_for_cancellation(id).await?;
        ReservationTtls::new(&mut tx).mark_cleaned(id).await?;

        tx.commit().await?;

        tracing::info!(reservation_id = %id, released = released.len(), actor, "Cancelled reservation");

        Ok(reservation)
    }

    /// Finalize a pending reservation: its active holds are confirmed (the
    /// stock is sold) and the TTL stops tracking it.
    #[instrument(skip(self), err)]
    pub async fn confirm_reservation(&self, id: ReservationId) -> Result<Reservation> {
        let mut tx = self.pool.begin().await?;

        let reservation = match Reservations::new(&mut tx).confirm(id).await {
            Ok(reservation) => reservation,
            Err(DbError::NotFound) => {
                return Err(Error::NotFound {
                    resource: "reservation".to_string(),
                    id: id.to_string(),
                });
            }
            Err(DbError::ProtectedEntity { reason, .. }) => {
                return Err(Error::BadRequest { message: reason });
            }
            Err(e) => return Err(e.into()),
        };

        let holds = Inventory::new(&mut tx).holds_for_reservation(id).await?;
        let active: Vec<_> = holds.iter().filter(|h| h.status == HoldStatus::Active).map(|h| h.id).collect();
        if !active.is_empty() {
            Inventory::new(&mut tx).confirm_reservation(&active).await?;
        }
        ReservationTtls::new(&mut tx).mark_cleaned(id).await?;

        tx.commit().await?;

        Ok(reservation)
    }

    /// Push a reservation's deadline out by `additional_minutes` (added to
    /// the current deadline, not to now). Returns `false` when the
    /// reservation already expired or was cleaned up, a frequent caller
    /// scenario that is deliberately not an error.
    #[instrument(skip(self), err)]
    pub async fn extend_reservation(&self, id: ReservationId, additional_minutes: i32) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let extended = ReservationTtls::new(&mut conn).extend(id, additional_minutes).await?;
        Ok(extended)
    }

    /// Set (or reset) a reservation's TTL after the fact, e.g. when a
    /// caller re-opens an abandoned checkout.
    #[instrument(skip(self), err)]
    pub async fn set_reservation_ttl(&self, id: ReservationId, ttl_minutes: Option<i32>) -> Result<ReservationTtl> {
        let mut conn = self.pool.acquire().await?;

        let reservation = Reservations::new(&mut conn).get_by_id(id).await?.ok_or_else(|| Error::NotFound {
            resource: "reservation".to_string(),
            id: id.to_string(),
        })?;

        self.resolve_and_set_ttl(&mut conn, id, ttl_minutes, reservation.business_id, reservation.service_type_id)
            .await
    }

    /// TTL resolution order: explicit override, the business's active policy
    /// default, then the hard 30-minute fallback.
    async fn resolve_and_set_ttl(
        &self,
        db: &mut sqlx::PgConnection,
        reservation_id: ReservationId,
        ttl_minutes: Option<i32>,
        business_id: BusinessId,
        service_type: Option<ServiceTypeId>,
    ) -> Result<ReservationTtl> {
        let ttl_minutes = match ttl_minutes {
            Some(minutes) => minutes,
            None => match self.policies.active_for_business(db, business_id, service_type).await? {
                Some(policy) => policy.default_ttl_minutes,
                None => FALLBACK_TTL_MINUTES,
            },
        };

        let expires_at = Utc::now() + Duration::minutes(i64::from(ttl_minutes));
        let ttl = ReservationTtls::new(db).upsert(reservation_id, expires_at).await?;
        Ok(ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::reservations::ReservationStatus;
    use crate::test_utils::{create_test_policy, create_test_product};
    use sqlx::PgPool;
    use uuid::Uuid;

    fn booking(pool: &PgPool) -> BookingService {
        // Cache-absent configuration: every policy lookup hits the store
        BookingService::new(pool.clone(), PolicyStore::disabled())
    }

    fn minutes_from_now(ttl: &ReservationTtl) -> i64 {
        (ttl.expires_at - Utc::now()).num_minutes()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_ttl_defaults_to_active_policy(pool: PgPool) {
        let business = Uuid::new_v4();
        create_test_policy(&pool, business, |req| req.default_ttl_minutes = 45).await;

        let created = booking(&pool)
            .create_reservation(CreateReservationInput {
                business_id: business,
                ..Default::default()
            })
            .await
            .unwrap();

        let minutes = minutes_from_now(&created.ttl);
        assert!((44..=45).contains(&minutes), "expected ~45 minutes, got {minutes}");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_ttl_falls_back_without_policy(pool: PgPool) {
        let created = booking(&pool)
            .create_reservation(CreateReservationInput {
                business_id: Uuid::new_v4(),
                ..Default::default()
            })
            .await
            .unwrap();

        let minutes = minutes_from_now(&created.ttl);
        assert!((29..=30).contains(&minutes), "expected ~30 minutes, got {minutes}");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_explicit_ttl_overrides_policy(pool: PgPool) {
        let business = Uuid::new_v4();
        create_test_policy(&pool, business, |req| req.default_ttl_minutes = 45).await;

        let created = booking(&pool)
            .create_reservation(CreateReservationInput {
                business_id: business,
                ttl_minutes: Some(90),
                ..Default::default()
            })
            .await
            .unwrap();

        let minutes = minutes_from_now(&created.ttl);
        assert!((89..=90).contains(&minutes), "expected ~90 minutes, got {minutes}");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_shortfall_persists_nothing(pool: PgPool) {
        let business = Uuid::new_v4();
        let product = create_test_product(&pool, business, 1).await;

        let service = booking(&pool);
        let err = service
            .create_reservation(CreateReservationInput {
                business_id: business,
                items: vec![ItemRequest {
                    product_id: product.product_id,
                    quantity: 3,
                }],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientInventory { .. }));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reservations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);

        let mut conn = pool.acquire().await.unwrap();
        let product_after = Inventory::new(&mut conn).get_product(product.product_id).await.unwrap().unwrap();
        assert_eq!(product_after.available_quantity, 1);
        assert_eq!(product_after.reserved_quantity, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_cancel_releases_holds_and_rejects_repeat(pool: PgPool) {
        let business = Uuid::new_v4();
        let product = create_test_product(&pool, business, 5).await;

        let service = booking(&pool);
        let created = service
            .create_reservation(CreateReservationInput {
                business_id: business,
                items: vec![ItemRequest {
                    product_id: product.product_id,
                    quantity: 2,
                }],
                ..Default::default()
            })
            .await
            .unwrap();

        let cancelled = service
            .cancel_reservation(created.reservation.id, "customer", Some("changed plans"))
            .await
            .unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);

        let mut conn = pool.acquire().await.unwrap();
        let product_after = Inventory::new(&mut conn).get_product(product.product_id).await.unwrap().unwrap();
        assert_eq!(product_after.available_quantity, 5);
        assert_eq!(product_after.reserved_quantity, 0);

        let err = service.cancel_reservation(created.reservation.id, "customer", None).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_confirm_sells_stock_and_retires_ttl(pool: PgPool) {
        let business = Uuid::new_v4();
        let product = create_test_product(&pool, business, 5).await;

        let service = booking(&pool);
        let created = service
            .create_reservation(CreateReservationInput {
                business_id: business,
                items: vec![ItemRequest {
                    product_id: product.product_id,
                    quantity: 2,
                }],
                ..Default::default()
            })
            .await
            .unwrap();

        let confirmed = service.confirm_reservation(created.reservation.id).await.unwrap();
        assert_eq!(confirmed.status, ReservationStatus::Confirmed);

        let mut conn = pool.acquire().await.unwrap();
        let product_after = Inventory::new(&mut conn).get_product(product.product_id).await.unwrap().unwrap();
        assert_eq!(product_after.total_quantity, 3);
        assert_eq!(product_after.reserved_quantity, 0);

        // The TTL record no longer tracks the reservation
        use crate::db::models::reservation_ttls::TtlStatus;
        let ttl = ReservationTtls::new(&mut conn).get(created.reservation.id).await.unwrap().unwrap();
        assert_eq!(ttl.status, TtlStatus::Cleaned);

        // Extension on a retired reservation fails silently
        assert!(!service.extend_reservation(created.reservation.id, 15).await.unwrap());
    }
}
