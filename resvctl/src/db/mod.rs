//! Database layer for data persistence and access.
//!
//! This module implements the data access layer using SQLx with PostgreSQL.
//! It follows the Repository pattern to provide clean abstractions over
//! database operations.
//!
//! # Modules
//!
//! - [`handlers`]: Repository implementations for the four core entities
//! - [`models`]: Database record structures matching table schemas
//! - [`errors`]: Database-specific error types
//!
//! # Transactions
//!
//! Repositories work with SQLx transactions to ensure ACID properties.
//! Mutating operations that span multiple rows (reserving a list of items,
//! releasing a reservation's holds) always open a transaction internally, so
//! callers never observe partial effect. Create repositories from a
//! transaction when composing several of them into one atomic unit:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let reservation = Reservations::new(&mut tx).create(&request).await?;
//! let holds = Inventory::new(&mut tx).reserve_items(reservation.id, &items, 30).await?;
//! tx.commit().await?;
//! ```
//!
//! # Migrations
//!
//! Database migrations are managed by SQLx and located in the `migrations/`
//! directory. The [`crate::migrator`] function provides access to the
//! migrator:
//!
//! ```ignore
//! resvctl::migrator().run(&pool).await?;
//! ```

pub mod errors;
pub mod handlers;
pub mod models;
