//! The inventory ledger: per-product stock counters and hold lifecycle.
//!
//! Every mutation here runs inside a transaction that takes a per-product
//! row lock (`SELECT ... FOR UPDATE`), so concurrent reserves against the
//! same product serialize while cross-product operations proceed in
//! parallel. Callers never observe partial effect: any failure rolls the
//! whole operation back.

use chrono::{Duration, Utc};
use sqlx::{Connection, PgConnection};
use tracing::instrument;

use crate::db::errors::DbError;
use crate::db::models::inventory::{HoldStatus, InventoryHold, ItemRequest, ProductCreateRequest, ProductInventory};
use crate::errors::{Error, Result};
use crate::types::{BusinessId, HoldId, ProductId, ReservationId};

const PRODUCT_COLUMNS: &str = "product_id, business_id, total_quantity, available_quantity, reserved_quantity, \
     minimum_stock, tracking_enabled, created_at, updated_at";

const HOLD_COLUMNS: &str = "id, reservation_id, product_id, quantity, hold_until, status, created_at, released_at";

pub struct Inventory<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Inventory<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Provision stock counters for a product. New products start with all
    /// stock available and nothing reserved.
    #[instrument(skip(self, request), fields(product_id = %request.product_id), err)]
    pub async fn create_product(&mut self, request: &ProductCreateRequest) -> Result<ProductInventory> {
        let product = sqlx::query_as::<_, ProductInventory>(&format!(
            r#"
            INSERT INTO product_inventory
                (product_id, business_id, total_quantity, available_quantity, reserved_quantity, minimum_stock, tracking_enabled)
            VALUES ($1, $2, $3, $3, 0, $4, $5)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(request.product_id)
        .bind(request.business_id)
        .bind(request.total_quantity)
        .bind(request.minimum_stock)
        .bind(request.tracking_enabled)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(product)
    }

    #[instrument(skip(self), err)]
    pub async fn get_product(&mut self, product_id: ProductId) -> Result<Option<ProductInventory>> {
        let product =
            sqlx::query_as::<_, ProductInventory>(&format!("SELECT {PRODUCT_COLUMNS} FROM product_inventory WHERE product_id = $1"))
                .bind(product_id)
                .fetch_optional(&mut *self.db)
                .await?;

        Ok(product)
    }

    /// Adjust total stock by `delta` (restock or shrinkage). The delta flows
    /// into `available_quantity`; the check constraints reject an adjustment
    /// that would cut into currently reserved stock.
    #[instrument(skip(self), err)]
    pub async fn adjust_stock(&mut self, product_id: ProductId, delta: i32) -> Result<ProductInventory> {
        let mut tx = self.db.begin().await?;

        // Lock first so concurrent reserves serialize against the adjustment
        sqlx::query(&format!("SELECT {PRODUCT_COLUMNS} FROM product_inventory WHERE product_id = $1 FOR UPDATE"))
            .bind(product_id)
            .fetch_one(&mut *tx)
            .await?;

        let product = sqlx::query_as::<_, ProductInventory>(&format!(
            r#"
            UPDATE product_inventory
            SET total_quantity = total_quantity + $2,
                available_quantity = available_quantity + $2,
                updated_at = now()
            WHERE product_id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(product_id)
        .bind(delta)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(product)
    }

    /// Products whose available stock fell below their configured minimum.
    /// Surfaced to businesses as restock alerts.
    #[instrument(skip(self), err)]
    pub async fn products_below_minimum(&mut self, business_id: BusinessId) -> Result<Vec<ProductInventory>> {
        let products = sqlx::query_as::<_, ProductInventory>(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS} FROM product_inventory
            WHERE business_id = $1 AND tracking_enabled AND available_quantity < minimum_stock
            ORDER BY available_quantity ASC
            "#
        ))
        .bind(business_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(products)
    }

    /// Read-only availability check. Takes no locks; a later
    /// [`Self::reserve_items`] may still fail, callers must tolerate the race.
    /// Products without counters or with tracking disabled count as available.
    #[instrument(skip(self, items), fields(count = items.len()), err)]
    pub async fn check_availability(&mut self, items: &[ItemRequest]) -> Result<bool> {
        for item in items {
            let product = self.get_product(item.product_id).await?;
            if let Some(product) = product {
                if product.tracking_enabled && product.available_quantity < item.quantity {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Reserve stock for every item, all-or-nothing.
    ///
    /// Opens one transaction; per item (in input order) locks the product
    /// row, re-checks availability and moves the quantity from available to
    /// reserved, then inserts an `active` hold expiring after
    /// `hold_duration_minutes`. Any shortfall aborts the entire reservation
    /// with [`Error::InsufficientInventory`] and no hold survives.
    ///
    /// Products with tracking disabled get a hold without counter movement.
    #[instrument(skip(self, items), fields(reservation_id = %reservation_id, count = items.len()), err)]
    pub async fn reserve_items(
        &mut self,
        reservation_id: ReservationId,
        items: &[ItemRequest],
        hold_duration_minutes: i32,
    ) -> Result<Vec<InventoryHold>> {
        let hold_until = Utc::now() + Duration::minutes(i64::from(hold_duration_minutes));

        let mut tx = self.db.begin().await?;
        let mut holds = Vec::with_capacity(items.len());

        for item in items {
            let product = sqlx::query_as::<_, ProductInventory>(&format!(
                "SELECT {PRODUCT_COLUMNS} FROM product_inventory WHERE product_id = $1 FOR UPDATE"
            ))
            .bind(item.product_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound)?;

            if product.tracking_enabled {
                if product.available_quantity < item.quantity {
                    // Dropping the transaction rolls back every hold taken so far
                    return Err(Error::InsufficientInventory {
                        product_id: item.product_id,
                        requested: item.quantity,
                        available: product.available_quantity,
                    });
                }

                sqlx::query(
                    r#"
                    UPDATE product_inventory
                    SET available_quantity = available_quantity - $2,
                        reserved_quantity = reserved_quantity + $2,
                        updated_at = now()
                    WHERE product_id = $1
                    "#,
                )
                .bind(item.product_id)
                .bind(item.quantity)
                .execute(&mut *tx)
                .await?;
            }

            let hold = sqlx::query_as::<_, InventoryHold>(&format!(
                r#"
                INSERT INTO inventory_holds (reservation_id, product_id, quantity, hold_until)
                VALUES ($1, $2, $3, $4)
                RETURNING {HOLD_COLUMNS}
                "#
            ))
            .bind(reservation_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(hold_until)
            .fetch_one(&mut *tx)
            .await?;

            holds.push(hold);
        }

        tx.commit().await?;

        Ok(holds)
    }

    /// Confirm active holds: the held stock is permanently consumed (sold),
    /// leaving both the total and reserved counters.
    #[instrument(skip(self, hold_ids), fields(count = hold_ids.len()), err)]
    pub async fn confirm_reservation(&mut self, hold_ids: &[HoldId]) -> Result<Vec<InventoryHold>> {
        let mut tx = self.db.begin().await?;
        let mut confirmed = Vec::new();

        for hold_id in hold_ids {
            let hold =
                sqlx::query_as::<_, InventoryHold>(&format!("SELECT {HOLD_COLUMNS} FROM inventory_holds WHERE id = $1 FOR UPDATE"))
                    .bind(hold_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or(DbError::NotFound)?;

            if hold.status != HoldStatus::Active {
                continue;
            }

            sqlx::query(
                r#"
                UPDATE product_inventory
                SET total_quantity = total_quantity - $2,
                    reserved_quantity = reserved_quantity - $2,
                    updated_at = now()
                WHERE product_id = $1 AND tracking_enabled
                "#,
            )
            .bind(hold.product_id)
            .bind(hold.quantity)
            .execute(&mut *tx)
            .await?;

            let hold = sqlx::query_as::<_, InventoryHold>(&format!(
                "UPDATE inventory_holds SET status = 'confirmed' WHERE id = $1 RETURNING {HOLD_COLUMNS}"
            ))
            .bind(hold_id)
            .fetch_one(&mut *tx)
            .await?;

            confirmed.push(hold);
        }

        tx.commit().await?;

        Ok(confirmed)
    }

    /// Release holds back to stock. Only `active` and `expired` holds move
    /// counters; already-released and confirmed holds are skipped, so the
    /// operation is idempotent per hold id.
    #[instrument(skip(self, hold_ids), fields(count = hold_ids.len()), err)]
    pub async fn release_holds(&mut self, hold_ids: &[HoldId]) -> Result<Vec<InventoryHold>> {
        let mut tx = self.db.begin().await?;
        let mut released = Vec::new();

        for hold_id in hold_ids {
            let hold =
                sqlx::query_as::<_, InventoryHold>(&format!("SELECT {HOLD_COLUMNS} FROM inventory_holds WHERE id = $1 FOR UPDATE"))
                    .bind(hold_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or(DbError::NotFound)?;

            if !matches!(hold.status, HoldStatus::Active | HoldStatus::Expired) {
                continue;
            }

            let hold = Self::release_one(&mut tx, &hold).await?;
            released.push(hold);
        }

        tx.commit().await?;

        Ok(released)
    }

    /// Release every live hold of a cancelled reservation. Unlike expiry,
    /// explicit cancellation also unwinds `confirmed` holds, returning the
    /// sold quantity to stock.
    #[instrument(skip(self), err)]
    pub async fn release_for_cancellation(&mut self, reservation_id: ReservationId) -> Result<Vec<InventoryHold>> {
        let mut tx = self.db.begin().await?;

        let holds = sqlx::query_as::<_, InventoryHold>(&format!(
            r#"
            SELECT {HOLD_COLUMNS} FROM inventory_holds
            WHERE reservation_id = $1 AND status IN ('active', 'confirmed', 'expired')
            ORDER BY created_at
            FOR UPDATE
            "#
        ))
        .bind(reservation_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut released = Vec::with_capacity(holds.len());
        for hold in &holds {
            let hold = if hold.status == HoldStatus::Confirmed {
                // Confirmed stock was already deducted from the totals; put it back
                sqlx::query(
                    r#"
                    UPDATE product_inventory
                    SET total_quantity = total_quantity + $2,
                        available_quantity = available_quantity + $2,
                        updated_at = now()
                    WHERE product_id = $1 AND tracking_enabled
                    "#,
                )
                .bind(hold.product_id)
                .bind(hold.quantity)
                .execute(&mut *tx)
                .await?;

                sqlx::query_as::<_, InventoryHold>(&format!(
                    "UPDATE inventory_holds SET status = 'released', released_at = now() WHERE id = $1 RETURNING {HOLD_COLUMNS}"
                ))
                .bind(hold.id)
                .fetch_one(&mut *tx)
                .await?
            } else {
                Self::release_one(&mut tx, hold).await?
            };
            released.push(hold);
        }

        tx.commit().await?;

        Ok(released)
    }

    /// The expiration processor's release path: mark the reservation's
    /// `active` holds `expired`, then return their stock, in one transaction.
    #[instrument(skip(self), err)]
    pub async fn expire_and_release_for_reservation(&mut self, reservation_id: ReservationId) -> Result<Vec<InventoryHold>> {
        let mut tx = self.db.begin().await?;

        let holds = sqlx::query_as::<_, InventoryHold>(&format!(
            r#"
            SELECT {HOLD_COLUMNS} FROM inventory_holds
            WHERE reservation_id = $1 AND status IN ('active', 'expired')
            ORDER BY created_at
            FOR UPDATE
            "#
        ))
        .bind(reservation_id)
        .fetch_all(&mut *tx)
        .await?;

        if holds.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        sqlx::query("UPDATE inventory_holds SET status = 'expired' WHERE reservation_id = $1 AND status = 'active'")
            .bind(reservation_id)
            .execute(&mut *tx)
            .await?;

        for hold in &holds {
            sqlx::query(
                r#"
                UPDATE product_inventory
                SET available_quantity = available_quantity + $2,
                    reserved_quantity = reserved_quantity - $2,
                    updated_at = now()
                WHERE product_id = $1 AND tracking_enabled
                "#,
            )
            .bind(hold.product_id)
            .bind(hold.quantity)
            .execute(&mut *tx)
            .await?;
        }

        let released = sqlx::query_as::<_, InventoryHold>(&format!(
            r#"
            UPDATE inventory_holds SET status = 'released', released_at = now()
            WHERE reservation_id = $1 AND status = 'expired'
            RETURNING {HOLD_COLUMNS}
            "#
        ))
        .bind(reservation_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(released)
    }

    /// All holds belonging to a reservation, oldest first.
    #[instrument(skip(self), err)]
    pub async fn holds_for_reservation(&mut self, reservation_id: ReservationId) -> Result<Vec<InventoryHold>> {
        let holds = sqlx::query_as::<_, InventoryHold>(&format!(
            "SELECT {HOLD_COLUMNS} FROM inventory_holds WHERE reservation_id = $1 ORDER BY created_at"
        ))
        .bind(reservation_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(holds)
    }

    /// Move one active/expired hold's quantity back into available stock.
    async fn release_one(tx: &mut PgConnection, hold: &InventoryHold) -> Result<InventoryHold> {
        sqlx::query(
            r#"
            UPDATE product_inventory
            SET available_quantity = available_quantity + $2,
                reserved_quantity = reserved_quantity - $2,
                updated_at = now()
            WHERE product_id = $1 AND tracking_enabled
            "#,
        )
        .bind(hold.product_id)
        .bind(hold.quantity)
        .execute(&mut *tx)
        .await?;

        let hold = sqlx::query_as::<_, InventoryHold>(&format!(
            "UPDATE inventory_holds SET status = 'released', released_at = now() WHERE id = $1 RETURNING {HOLD_COLUMNS}"
        ))
        .bind(hold.id)
        .fetch_one(&mut *tx)
        .await?;

        Ok(hold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_inventory_invariant, create_test_product, create_test_reservation};
    use sqlx::PgPool;
    use uuid::Uuid;

    #[sqlx::test]
    #[test_log::test]
    async fn test_reserve_and_release_roundtrip(pool: PgPool) {
        let business = Uuid::new_v4();
        let product = create_test_product(&pool, business, 5).await;
        let reservation = create_test_reservation(&pool, business).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut inventory = Inventory::new(&mut conn);

        let holds = inventory
            .reserve_items(
                reservation.id,
                &[ItemRequest {
                    product_id: product.product_id,
                    quantity: 3,
                }],
                30,
            )
            .await
            .unwrap();

        assert_eq!(holds.len(), 1);
        assert_eq!(holds[0].status, HoldStatus::Active);
        assert_eq!(holds[0].quantity, 3);

        let product_after = inventory.get_product(product.product_id).await.unwrap().unwrap();
        assert_eq!(product_after.available_quantity, 2);
        assert_eq!(product_after.reserved_quantity, 3);
        assert_inventory_invariant(&product_after);

        let released = inventory.release_holds(&[holds[0].id]).await.unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].status, HoldStatus::Released);
        assert!(released[0].released_at.is_some());

        let product_after = inventory.get_product(product.product_id).await.unwrap().unwrap();
        assert_eq!(product_after.available_quantity, 5);
        assert_eq!(product_after.reserved_quantity, 0);
        assert_inventory_invariant(&product_after);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_reserve_shortfall_rolls_back_every_item(pool: PgPool) {
        let business = Uuid::new_v4();
        let stocked = create_test_product(&pool, business, 10).await;
        let scarce = create_test_product(&pool, business, 1).await;
        let reservation = create_test_reservation(&pool, business).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut inventory = Inventory::new(&mut conn);

        let err = inventory
            .reserve_items(
                reservation.id,
                &[
                    ItemRequest {
                        product_id: stocked.product_id,
                        quantity: 4,
                    },
                    ItemRequest {
                        product_id: scarce.product_id,
                        quantity: 2,
                    },
                ],
                30,
            )
            .await
            .unwrap_err();

        match err {
            Error::InsufficientInventory {
                product_id,
                requested,
                available,
            } => {
                assert_eq!(product_id, scarce.product_id);
                assert_eq!(requested, 2);
                assert_eq!(available, 1);
            }
            other => panic!("expected InsufficientInventory, got {other:?}"),
        }

        // The first item's counters were rolled back and no hold row survived
        let stocked_after = inventory.get_product(stocked.product_id).await.unwrap().unwrap();
        assert_eq!(stocked_after.available_quantity, 10);
        assert_eq!(stocked_after.reserved_quantity, 0);
        assert!(inventory.holds_for_reservation(reservation.id).await.unwrap().is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_release_is_idempotent(pool: PgPool) {
        let business = Uuid::new_v4();
        let product = create_test_product(&pool, business, 5).await;
        let reservation = create_test_reservation(&pool, business).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut inventory = Inventory::new(&mut conn);

        let holds = inventory
            .reserve_items(
                reservation.id,
                &[ItemRequest {
                    product_id: product.product_id,
                    quantity: 2,
                }],
                30,
            )
            .await
            .unwrap();

        inventory.release_holds(&[holds[0].id]).await.unwrap();
        let second = inventory.release_holds(&[holds[0].id]).await.unwrap();
        assert!(second.is_empty());

        let product_after = inventory.get_product(product.product_id).await.unwrap().unwrap();
        assert_eq!(product_after.available_quantity, 5);
        assert_eq!(product_after.reserved_quantity, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_confirm_consumes_stock(pool: PgPool) {
        let business = Uuid::new_v4();
        let product = create_test_product(&pool, business, 5).await;
        let reservation = create_test_reservation(&pool, business).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut inventory = Inventory::new(&mut conn);

        let holds = inventory
            .reserve_items(
                reservation.id,
                &[ItemRequest {
                    product_id: product.product_id,
                    quantity: 2,
                }],
                30,
            )
            .await
            .unwrap();

        let confirmed = inventory.confirm_reservation(&[holds[0].id]).await.unwrap();
        assert_eq!(confirmed[0].status, HoldStatus::Confirmed);

        let product_after = inventory.get_product(product.product_id).await.unwrap().unwrap();
        assert_eq!(product_after.total_quantity, 3);
        assert_eq!(product_after.available_quantity, 3);
        assert_eq!(product_after.reserved_quantity, 0);
        assert_inventory_invariant(&product_after);

        // Releasing a confirmed hold through the plain path is a no-op
        let released = inventory.release_holds(&[holds[0].id]).await.unwrap();
        assert!(released.is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_cancellation_returns_confirmed_stock(pool: PgPool) {
        let business = Uuid::new_v4();
        let product = create_test_product(&pool, business, 5).await;
        let reservation = create_test_reservation(&pool, business).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut inventory = Inventory::new(&mut conn);

        let holds = inventory
            .reserve_items(
                reservation.id,
                &[ItemRequest {
                    product_id: product.product_id,
                    quantity: 2,
                }],
                30,
            )
            .await
            .unwrap();
        inventory.confirm_reservation(&[holds[0].id]).await.unwrap();

        let released = inventory.release_for_cancellation(reservation.id).await.unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].status, HoldStatus::Released);

        let product_after = inventory.get_product(product.product_id).await.unwrap().unwrap();
        assert_eq!(product_after.total_quantity, 5);
        assert_eq!(product_after.available_quantity, 5);
        assert_eq!(product_after.reserved_quantity, 0);
        assert_inventory_invariant(&product_after);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_untracked_product_reserves_without_counters(pool: PgPool) {
        let business = Uuid::new_v4();
        let reservation = create_test_reservation(&pool, business).await;

        let mut conn = pool.acquire().await.unwrap();
        let mut inventory = Inventory::new(&mut conn);

        let product = inventory
            .create_product(&ProductCreateRequest {
                product_id: Uuid::new_v4(),
                business_id: business,
                total_quantity: 0,
                minimum_stock: 0,
                tracking_enabled: false,
            })
            .await
            .unwrap();

        let items = [ItemRequest {
            product_id: product.product_id,
            quantity: 100,
        }];

        assert!(inventory.check_availability(&items).await.unwrap());

        let holds = inventory.reserve_items(reservation.id, &items, 30).await.unwrap();
        assert_eq!(holds.len(), 1);

        let product_after = inventory.get_product(product.product_id).await.unwrap().unwrap();
        assert_eq!(product_after.available_quantity, 0);
        assert_eq!(product_after.reserved_quantity, 0);

        // And release keeps the counters untouched too
        inventory.release_holds(&[holds[0].id]).await.unwrap();
        let product_after = inventory.get_product(product.product_id).await.unwrap().unwrap();
        assert_eq!(product_after.available_quantity, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_concurrent_reserves_never_oversell(pool: PgPool) {
        let business = Uuid::new_v4();
        let product = create_test_product(&pool, business, 5).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let product_id = product.product_id;
            tasks.push(tokio::spawn(async move {
                let reservation = create_test_reservation(&pool, Uuid::new_v4()).await;
                let mut conn = pool.acquire().await.unwrap();
                Inventory::new(&mut conn)
                    .reserve_items(reservation.id, &[ItemRequest { product_id, quantity: 1 }], 30)
                    .await
                    .is_ok()
            }));
        }

        let results = futures::future::join_all(tasks).await;
        let successes = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();
        assert_eq!(successes, 5);

        let mut conn = pool.acquire().await.unwrap();
        let product_after = Inventory::new(&mut conn).get_product(product.product_id).await.unwrap().unwrap();
        assert_eq!(product_after.available_quantity, 0);
        assert_eq!(product_after.reserved_quantity, 5);
        assert_inventory_invariant(&product_after);
    }
}
