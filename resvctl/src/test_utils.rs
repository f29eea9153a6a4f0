//! Test utilities for integration testing

use sqlx::PgPool;
use uuid::Uuid;

use crate::db::handlers::repository::Repository;
use crate::db::handlers::{ExpirationPolicies, Inventory, Reservations};
use crate::db::models::inventory::{ProductCreateRequest, ProductInventory};
use crate::db::models::policies::{ExpirationPolicy, PolicyCreateRequest};
use crate::db::models::reservations::{Reservation, ReservationCreateRequest};

/// Provision a tracked product with `total` units, all available.
pub async fn create_test_product(pool: &PgPool, business_id: Uuid, total: i32) -> ProductInventory {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Inventory::new(&mut conn)
        .create_product(&ProductCreateRequest {
            product_id: Uuid::new_v4(),
            business_id,
            total_quantity: total,
            minimum_stock: 0,
            tracking_enabled: true,
        })
        .await
        .expect("Failed to create test product")
}

/// Create an active policy for `business_id`, with the defaults tweaked by
/// `customize`.
pub async fn create_test_policy(
    pool: &PgPool,
    business_id: Uuid,
    customize: impl FnOnce(&mut PolicyCreateRequest),
) -> ExpirationPolicy {
    let mut request = PolicyCreateRequest {
        business_id,
        name: format!("test-policy-{}", Uuid::new_v4()),
        default_ttl_minutes: 30,
        ..Default::default()
    };
    customize(&mut request);

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    ExpirationPolicies::new(&mut conn)
        .create(&request)
        .await
        .expect("Failed to create test policy")
}

/// Insert a bare pending reservation.
pub async fn create_test_reservation(pool: &PgPool, business_id: Uuid) -> Reservation {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Reservations::new(&mut conn)
        .create(&ReservationCreateRequest {
            business_id,
            service_type_id: None,
            customer_ref: Some(format!("customer-{}@example.com", Uuid::new_v4())),
        })
        .await
        .expect("Failed to create test reservation")
}

/// The ledger invariant every mutation must preserve.
pub fn assert_inventory_invariant(product: &ProductInventory) {
    assert!(product.available_quantity >= 0, "available_quantity went negative");
    assert!(product.reserved_quantity >= 0, "reserved_quantity went negative");
    assert!(
        product.available_quantity + product.reserved_quantity <= product.total_quantity,
        "available ({}) + reserved ({}) exceeds total ({})",
        product.available_quantity,
        product.reserved_quantity,
        product.total_quantity
    );
}
