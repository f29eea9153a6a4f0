//! Database repository for per-reservation TTL tracking.
//!
//! All lifecycle mutations are single guarded UPDATEs: the status filter and
//! the `warnings_sent` membership check live in the WHERE clause, so there is
//! no read-then-write race and callers learn from the row count whether the
//! transition happened.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::reservation_ttls::{ReservationTtl, TtlCandidate};
use crate::types::{BusinessId, ReservationId};

const TTL_COLUMNS: &str = "reservation_id, expires_at, warnings_sent, grace_period_ends_at, status, created_at, updated_at";

const CANDIDATE_COLUMNS: &str = "t.reservation_id, t.expires_at, t.warnings_sent, t.grace_period_ends_at, t.status, \
     r.business_id, r.service_type_id, r.customer_ref";

pub struct ReservationTtls<'c> {
    db: &'c mut PgConnection,
}

impl<'c> ReservationTtls<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Create or reset the TTL record for a reservation: fresh deadline,
    /// empty warning history, status back to `active`.
    #[instrument(skip(self), err)]
    pub async fn upsert(&mut self, reservation_id: ReservationId, expires_at: DateTime<Utc>) -> Result<ReservationTtl> {
        let ttl = sqlx::query_as::<_, ReservationTtl>(&format!(
            r#"
            INSERT INTO reservation_ttls (reservation_id, expires_at)
            VALUES ($1, $2)
            ON CONFLICT (reservation_id) DO UPDATE
            SET expires_at = EXCLUDED.expires_at,
                warnings_sent = '{{}}',
                grace_period_ends_at = NULL,
                status = 'active',
                updated_at = now()
            RETURNING {TTL_COLUMNS}
            "#
        ))
        .bind(reservation_id)
        .bind(expires_at)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(ttl)
    }

    #[instrument(skip(self), err)]
    pub async fn get(&mut self, reservation_id: ReservationId) -> Result<Option<ReservationTtl>> {
        let ttl = sqlx::query_as::<_, ReservationTtl>(&format!("SELECT {TTL_COLUMNS} FROM reservation_ttls WHERE reservation_id = $1"))
            .bind(reservation_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(ttl)
    }

    /// Add minutes to the *current* deadline (extension compounds remaining
    /// time rather than resetting it). Returns `false` without mutating when
    /// the reservation is already `expired`/`cleaned` or has no TTL record;
    /// extending a lapsed reservation is an expected caller mistake, not a
    /// fault.
    #[instrument(skip(self), err)]
    pub async fn extend(&mut self, reservation_id: ReservationId, additional_minutes: i32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reservation_ttls
            SET expires_at = expires_at + ($2 * interval '1 minute'),
                updated_at = now()
            WHERE reservation_id = $1 AND status IN ('active', 'warned')
            "#,
        )
        .bind(reservation_id)
        .bind(additional_minutes)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record one warning interval as sent and advance status to `warned`,
    /// in a single statement. Returns `false` when the interval was already
    /// recorded (it is never re-sent) or the record left the live states.
    #[instrument(skip(self), err)]
    pub async fn record_warning(&mut self, reservation_id: ReservationId, interval: i32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reservation_ttls
            SET warnings_sent = array_append(warnings_sent, $2),
                status = 'warned',
                updated_at = now()
            WHERE reservation_id = $1
              AND status IN ('active', 'warned')
              AND NOT ($2 = ANY(warnings_sent))
            "#,
        )
        .bind(reservation_id)
        .bind(interval)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Live TTL records of one business inside a warning window: expiring
    /// within `interval` minutes of `now` (but not yet expired) and not yet
    /// notified for this interval.
    #[instrument(skip(self, now), err)]
    pub async fn due_for_warning(
        &mut self,
        business_id: BusinessId,
        now: DateTime<Utc>,
        interval: i32,
    ) -> Result<Vec<TtlCandidate>> {
        let candidates = sqlx::query_as::<_, TtlCandidate>(&format!(
            r#"
            SELECT {CANDIDATE_COLUMNS}
            FROM reservation_ttls t
            JOIN reservations r ON r.id = t.reservation_id
            WHERE r.business_id = $1
              AND t.status IN ('active', 'warned')
              AND t.expires_at > $2
              AND t.expires_at <= $2 + ($3 * interval '1 minute')
              AND NOT ($3 = ANY(t.warnings_sent))
            ORDER BY t.expires_at
            "#
        ))
        .bind(business_id)
        .bind(now)
        .bind(interval)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(candidates)
    }

    /// Live TTL records whose deadline has passed, oldest first. Grace
    /// periods are the processor's concern, not this query's.
    #[instrument(skip(self, now), err)]
    pub async fn expiration_candidates(&mut self, now: DateTime<Utc>) -> Result<Vec<TtlCandidate>> {
        let candidates = sqlx::query_as::<_, TtlCandidate>(&format!(
            r#"
            SELECT {CANDIDATE_COLUMNS}
            FROM reservation_ttls t
            JOIN reservations r ON r.id = t.reservation_id
            WHERE t.expires_at < $1 AND t.status IN ('active', 'warned')
            ORDER BY t.expires_at
            "#
        ))
        .bind(now)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(candidates)
    }

    /// Note when a deferred expiry's grace window closes. Only set once.
    #[instrument(skip(self), err)]
    pub async fn set_grace_deadline(&mut self, reservation_id: ReservationId, ends_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE reservation_ttls
            SET grace_period_ends_at = $2, updated_at = now()
            WHERE reservation_id = $1 AND grace_period_ends_at IS NULL
            "#,
        )
        .bind(reservation_id)
        .bind(ends_at)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }

    /// Transition a live record to `expired`. Only the expiration processor
    /// calls this.
    #[instrument(skip(self), err)]
    pub async fn mark_expired(&mut self, reservation_id: ReservationId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE reservation_ttls SET status = 'expired', updated_at = now() WHERE reservation_id = $1 AND status IN ('active', 'warned')",
        )
        .bind(reservation_id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal transition after cleanup (auto-cleanup after expiry, or an
    /// explicit cancel/confirm that retired the reservation).
    #[instrument(skip(self), err)]
    pub async fn mark_cleaned(&mut self, reservation_id: ReservationId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE reservation_ttls SET status = 'cleaned', updated_at = now() WHERE reservation_id = $1 AND status <> 'cleaned'",
        )
        .bind(reservation_id)
        .execute(&mut *self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Retention sweep: hard-delete `cleaned` records untouched since before
    /// `cutoff`. Returns the number of rows removed.
    #[instrument(skip(self, cutoff), err)]
    pub async fn sweep_cleaned(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM reservation_ttls WHERE status = 'cleaned' AND updated_at < $1")
            .bind(cutoff)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::reservation_ttls::TtlStatus;
    use crate::test_utils::create_test_reservation;
    use chrono::Duration;
    use sqlx::PgPool;
    use uuid::Uuid;

    #[sqlx::test]
    #[test_log::test]
    async fn test_extend_compounds_current_deadline(pool: PgPool) {
        let reservation = create_test_reservation(&pool, Uuid::new_v4()).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut ttls = ReservationTtls::new(&mut conn);

        let before = ttls.upsert(reservation.id, Utc::now() + Duration::minutes(30)).await.unwrap();

        assert!(ttls.extend(reservation.id, 15).await.unwrap());

        let after = ttls.get(reservation.id).await.unwrap().unwrap();
        assert_eq!(after.expires_at, before.expires_at + Duration::minutes(15));
        assert_eq!(after.status, TtlStatus::Active);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_extend_refused_in_terminal_states(pool: PgPool) {
        let reservation = create_test_reservation(&pool, Uuid::new_v4()).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut ttls = ReservationTtls::new(&mut conn);

        let created = ttls.upsert(reservation.id, Utc::now() + Duration::minutes(30)).await.unwrap();
        ttls.mark_expired(reservation.id).await.unwrap();

        assert!(!ttls.extend(reservation.id, 15).await.unwrap());
        let after = ttls.get(reservation.id).await.unwrap().unwrap();
        assert_eq!(after.expires_at, created.expires_at);
        assert_eq!(after.status, TtlStatus::Expired);

        ttls.mark_cleaned(reservation.id).await.unwrap();
        assert!(!ttls.extend(reservation.id, 15).await.unwrap());

        // And a reservation without a TTL record extends to nothing
        assert!(!ttls.extend(Uuid::new_v4(), 15).await.unwrap());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_record_warning_fires_once_per_interval(pool: PgPool) {
        let reservation = create_test_reservation(&pool, Uuid::new_v4()).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut ttls = ReservationTtls::new(&mut conn);

        ttls.upsert(reservation.id, Utc::now() + Duration::minutes(30)).await.unwrap();

        assert!(ttls.record_warning(reservation.id, 60).await.unwrap());
        let after = ttls.get(reservation.id).await.unwrap().unwrap();
        assert_eq!(after.status, TtlStatus::Warned);
        assert_eq!(after.warnings_sent, vec![60]);

        // The same interval never fires twice
        assert!(!ttls.record_warning(reservation.id, 60).await.unwrap());

        // A different interval still can
        assert!(ttls.record_warning(reservation.id, 15).await.unwrap());
        let after = ttls.get(reservation.id).await.unwrap().unwrap();
        assert_eq!(after.warnings_sent, vec![60, 15]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_warning_window_selection(pool: PgPool) {
        let business = Uuid::new_v4();
        let reservation = create_test_reservation(&pool, business).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut ttls = ReservationTtls::new(&mut conn);

        let now = Utc::now();
        ttls.upsert(reservation.id, now + Duration::minutes(50)).await.unwrap();

        // 50 minutes out: inside the 60-minute window, outside the 15-minute one
        let due = ttls.due_for_warning(business, now, 60).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].reservation_id, reservation.id);
        assert!(ttls.due_for_warning(business, now, 15).await.unwrap().is_empty());

        // Once recorded, the 60-minute interval no longer selects
        ttls.record_warning(reservation.id, 60).await.unwrap();
        assert!(ttls.due_for_warning(business, now, 60).await.unwrap().is_empty());

        // A later tick 40 minutes on finds the reservation in the 15-minute window
        let later = now + Duration::minutes(40);
        let due = ttls.due_for_warning(business, later, 15).await.unwrap();
        assert_eq!(due.len(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_retention_sweep_deletes_only_old_cleaned(pool: PgPool) {
        let business = Uuid::new_v4();
        let old = create_test_reservation(&pool, business).await;
        let fresh = create_test_reservation(&pool, business).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut ttls = ReservationTtls::new(&mut conn);

        ttls.upsert(old.id, Utc::now() + Duration::minutes(30)).await.unwrap();
        ttls.upsert(fresh.id, Utc::now() + Duration::minutes(30)).await.unwrap();
        ttls.mark_cleaned(old.id).await.unwrap();
        ttls.mark_cleaned(fresh.id).await.unwrap();

        sqlx::query("UPDATE reservation_ttls SET updated_at = now() - interval '40 days' WHERE reservation_id = $1")
            .bind(old.id)
            .execute(&mut *conn)
            .await
            .unwrap();

        let mut ttls = ReservationTtls::new(&mut conn);
        let deleted = ttls.sweep_cleaned(Utc::now() - Duration::days(30)).await.unwrap();
        assert_eq!(deleted, 1);

        assert!(ttls.get(old.id).await.unwrap().is_none());
        assert!(ttls.get(fresh.id).await.unwrap().is_some());
    }
}
