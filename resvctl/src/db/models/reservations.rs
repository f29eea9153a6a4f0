//! Database models for the base reservation record.
//!
//! Only the status-field lifecycle is modeled here; everything else about a
//! booking (party size, notes, payment state) belongs to the surrounding
//! platform and is out of scope for this engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{BusinessId, ReservationId, ServiceTypeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

/// Database entity model
#[derive(Debug, Clone, FromRow)]
pub struct Reservation {
    pub id: ReservationId,
    pub business_id: BusinessId,
    pub service_type_id: Option<ServiceTypeId>,
    pub customer_ref: Option<String>,
    pub status: ReservationStatus,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request for creating a base reservation record
#[derive(Debug, Clone, Default)]
pub struct ReservationCreateRequest {
    pub business_id: BusinessId,
    pub service_type_id: Option<ServiceTypeId>,
    pub customer_ref: Option<String>,
}
