//! Database models for per-reservation TTL tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{BusinessId, ReservationId, ServiceTypeId};

/// Lifecycle status of a reservation's TTL record. Status only advances
/// forward: once `warned`, a reservation never returns to `active`; `expired`
/// is set exclusively by the expiration processor; `cleaned` rows are
/// eventually hard-deleted by the retention sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ttl_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TtlStatus {
    Active,
    Warned,
    Expired,
    Cleaned,
}

impl TtlStatus {
    /// True for the terminal states extension calls must refuse.
    pub fn is_terminal(self) -> bool {
        matches!(self, TtlStatus::Expired | TtlStatus::Cleaned)
    }
}

/// One TTL record per reservation (1:1).
#[derive(Debug, Clone, FromRow)]
pub struct ReservationTtl {
    pub reservation_id: ReservationId,
    pub expires_at: DateTime<Utc>,
    /// Minute-offsets already notified. Grows only.
    pub warnings_sent: Vec<i32>,
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    pub status: TtlStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A TTL record joined with its reservation's business linkage, as selected
/// by the processor's warning and expiration scans.
#[derive(Debug, Clone, FromRow)]
pub struct TtlCandidate {
    pub reservation_id: ReservationId,
    pub expires_at: DateTime<Utc>,
    pub warnings_sent: Vec<i32>,
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    pub status: TtlStatus,
    pub business_id: BusinessId,
    pub service_type_id: Option<ServiceTypeId>,
    pub customer_ref: Option<String>,
}
