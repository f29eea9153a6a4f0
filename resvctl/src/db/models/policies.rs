//! Database models for business expiration policies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{BusinessId, PolicyId, ServiceTypeId};

/// Business-configurable rules governing default TTL, warning schedule and
/// expiry behavior. `warning_intervals` is minutes-before-expiry, stored
/// sorted descending (earliest warning first), at most five entries, each
/// strictly below `default_ttl_minutes`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExpirationPolicy {
    pub id: PolicyId,
    pub business_id: BusinessId,
    pub name: String,
    pub default_ttl_minutes: i32,
    pub warning_intervals: Vec<i32>,
    pub grace_period_minutes: i32,
    pub auto_cleanup: bool,
    pub notify_warnings: bool,
    pub notify_expired: bool,
    pub notify_business: bool,
    pub service_type_scope: Option<Vec<ServiceTypeId>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExpirationPolicy {
    /// Warning intervals in the order the processor fires them (ascending,
    /// i.e. the largest minutes-before-expiry threshold is crossed first).
    pub fn intervals_ascending(&self) -> Vec<i32> {
        let mut intervals = self.warning_intervals.clone();
        intervals.sort_unstable();
        intervals
    }
}

/// Request for creating an expiration policy
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyCreateRequest {
    pub business_id: BusinessId,
    pub name: String,
    pub default_ttl_minutes: i32,
    pub warning_intervals: Vec<i32>,
    pub grace_period_minutes: i32,
    pub auto_cleanup: bool,
    pub notify_warnings: bool,
    pub notify_expired: bool,
    pub notify_business: bool,
    pub service_type_scope: Option<Vec<ServiceTypeId>>,
}

impl Default for PolicyCreateRequest {
    fn default() -> Self {
        Self {
            business_id: uuid::Uuid::nil(),
            name: String::new(),
            default_ttl_minutes: 30,
            warning_intervals: Vec::new(),
            grace_period_minutes: 0,
            auto_cleanup: false,
            notify_warnings: true,
            notify_expired: true,
            notify_business: false,
            service_type_scope: None,
        }
    }
}

/// Request for updating an expiration policy. `None` fields are left as-is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyUpdateRequest {
    pub name: Option<String>,
    pub default_ttl_minutes: Option<i32>,
    pub warning_intervals: Option<Vec<i32>>,
    pub grace_period_minutes: Option<i32>,
    pub auto_cleanup: Option<bool>,
    pub notify_warnings: Option<bool>,
    pub notify_expired: Option<bool>,
    pub notify_business: Option<bool>,
    pub service_type_scope: Option<Option<Vec<ServiceTypeId>>>,
    pub is_active: Option<bool>,
}

/// Filter for listing policies
#[derive(Debug, Clone)]
pub struct PolicyFilter {
    pub business_id: Option<BusinessId>,
    pub active_only: bool,
    pub skip: i64,
    pub limit: i64,
}

impl Default for PolicyFilter {
    fn default() -> Self {
        Self {
            business_id: None,
            active_only: false,
            skip: 0,
            limit: 100,
        }
    }
}
