//! Database models for product stock counters and inventory holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{BusinessId, HoldId, ProductId, ReservationId};

/// Lifecycle of a hold's claim against product stock.
///
/// `active` holds count against `reserved_quantity`. Confirmation consumes
/// the stock permanently; release returns it. A hold never changes again
/// once `released`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "hold_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum HoldStatus {
    Active,
    Confirmed,
    Expired,
    Released,
}

/// Per-product stock counters. Mutated exclusively through the
/// [`crate::db::handlers::Inventory`] repository's locked operations.
#[derive(Debug, Clone, FromRow)]
pub struct ProductInventory {
    pub product_id: ProductId,
    pub business_id: BusinessId,
    pub total_quantity: i32,
    pub available_quantity: i32,
    pub reserved_quantity: i32,
    pub minimum_stock: i32,
    pub tracking_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reservation's claim against one product's stock.
#[derive(Debug, Clone, FromRow)]
pub struct InventoryHold {
    pub id: HoldId,
    pub reservation_id: ReservationId,
    pub product_id: ProductId,
    pub quantity: i32,
    pub hold_until: DateTime<Utc>,
    pub status: HoldStatus,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

/// Request for provisioning a product's stock counters
#[derive(Debug, Clone)]
pub struct ProductCreateRequest {
    pub product_id: ProductId,
    pub business_id: BusinessId,
    pub total_quantity: i32,
    pub minimum_stock: i32,
    pub tracking_enabled: bool,
}

/// One line of a reserve/availability request
#[derive(Debug, Clone, Copy)]
pub struct ItemRequest {
    pub product_id: ProductId,
    pub quantity: i32,
}
