//! Database repository for the base reservation record's status fields.
//!
//! The wider booking domain owns these rows; this engine only creates them
//! on behalf of the orchestrator and advances their status when reservations
//! are confirmed, cancelled, or cleaned up after expiry.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::{DbError, Result};
use crate::db::models::reservations::{Reservation, ReservationCreateRequest};
use crate::types::ReservationId;

const RESERVATION_COLUMNS: &str = "id, business_id, service_type_id, customer_ref, status, cancelled_at, cancelled_by, \
     cancellation_reason, created_at, updated_at";

pub struct Reservations<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Reservations<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(business_id = %request.business_id), err)]
    pub async fn create(&mut self, request: &ReservationCreateRequest) -> Result<Reservation> {
        let reservation = sqlx::query_as::<_, Reservation>(&format!(
            r#"
            INSERT INTO reservations (business_id, service_type_id, customer_ref)
            VALUES ($1, $2, $3)
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(request.business_id)
        .bind(request.service_type_id)
        .bind(&request.customer_ref)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(reservation)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_id(&mut self, id: ReservationId) -> Result<Option<Reservation>> {
        let reservation = sqlx::query_as::<_, Reservation>(&format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(reservation)
    }

    /// Mark a reservation cancelled. Refused once it is already `cancelled`
    /// or `completed`.
    #[instrument(skip(self, reason), err)]
    pub async fn cancel(&mut self, id: ReservationId, actor: &str, reason: Option<&str>) -> Result<Reservation> {
        let reservation = sqlx::query_as::<_, Reservation>(&format!(
            r#"
            UPDATE reservations
            SET status = 'cancelled',
                cancelled_at = now(),
                cancelled_by = $2,
                cancellation_reason = $3,
                updated_at = now()
            WHERE id = $1 AND status NOT IN ('cancelled', 'completed')
            RETURNING {RESERVATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(actor)
        .bind(reason)
        .fetch_optional(&mut *self.db)
        .await?;

        match reservation {
            Some(reservation) => Ok(reservation),
            None => match self.get_by_id(id).await? {
                Some(existing) => Err(DbError::ProtectedEntity {
                    operation: "cancel".to_string(),
                    reason: format!("reservation is already {:?}", existing.status),
                    entity_type: "reservation".to_string(),
                    entity_id: Some(id.to_string()),
                }),
                None => Err(DbError::NotFound),
            },
        }
    }

    /// Finalize a pending reservation.
    #[instrument(skip(self), err)]
    pub async fn confirm(&mut self, id: ReservationId) -> Result<Reservation> {
        self.transition(id, "confirmed", "pending").await
    }

    /// Close out a confirmed reservation after service.
    #[instrument(skip(self), err)]
    pub async fn complete(&mut self, id: ReservationId) -> Result<Reservation> {
        self.transition(id, "completed", "confirmed").await
    }

    async fn transition(&mut self, id: ReservationId, to: &str, from: &str) -> Result<Reservation> {
        let reservation = sqlx::query_as::<_, Reservation>(&format!(
            "UPDATE reservations SET status = $2::reservation_status, updated_at = now() WHERE id = $1 AND status = $3::reservation_status RETURNING {RESERVATION_COLUMNS}"
        ))
        .bind(id)
        .bind(to)
        .bind(from)
        .fetch_optional(&mut *self.db)
        .await?;

        match reservation {
            Some(reservation) => Ok(reservation),
            None => match self.get_by_id(id).await? {
                Some(existing) => Err(DbError::ProtectedEntity {
                    operation: to.to_string(),
                    reason: format!("reservation is {:?}, expected {from}", existing.status),
                    entity_type: "reservation".to_string(),
                    entity_id: Some(id.to_string()),
                }),
                None => Err(DbError::NotFound),
            },
        }
    }
}
