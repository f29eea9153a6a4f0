//! # resvctl: Reservation Expiration & Inventory Hold Lifecycle Engine
//!
//! `resvctl` is the core engine behind a local-business reservation
//! platform: it assigns a time-to-live to every reservation, reserves and
//! releases finite product inventory against that TTL, warns customers
//! before expiry, and reconciles expired reservations with their held
//! inventory under concurrent access.
//!
//! ## Overview
//!
//! Reservation platforms hold stock provisionally while a customer decides:
//! a bakery puts three cakes aside when an order is placed, and wants them
//! back on the shelf if the customer never completes checkout. The hard
//! parts are the invariants (inventory must never be oversold), the state
//! transitions (active → warned → expired → cleaned), and the concurrency
//! hazards (two reservations racing for the same stock). This crate owns
//! exactly those; routing, payments, receipts and search are callers or
//! downstream consumers of its data.
//!
//! ## Architecture
//!
//! The engine is a library invoked in-process, plus one background worker:
//!
//! - The **inventory ledger** ([`db::handlers::Inventory`]) owns per-product
//!   stock counters and hold records. Every mutation runs in a transaction
//!   holding a per-product row lock, so concurrent reserves serialize and
//!   the ledger re-checks availability before committing instead of
//!   trusting an earlier unlocked read.
//! - The **policy store** ([`policy_store::PolicyStore`]) serves
//!   business-configurable expiration policies (default TTL, warning
//!   schedule, grace period, cleanup and notification toggles) cache-first
//!   through an in-process [moka](https://github.com/moka-rs/moka) cache.
//!   The cache is strictly an optimization: the disabled configuration is
//!   supported and exercised in tests.
//! - The **TTL tracker** ([`db::handlers::ReservationTtls`]) owns each
//!   reservation's expiry timestamp, warning history and lifecycle status,
//!   mutated only through guarded single-statement updates.
//! - The **expiration processor** ([`processor::ExpirationProcessor`]) is a
//!   periodic loop that warns, expires and prunes in three strictly ordered
//!   passes per tick. Its lifecycle is owned by the composition root; tests
//!   drive [`processor::tick`] directly with a fake clock.
//! - The **booking service** ([`booking::BookingService`]) is the entry
//!   point creation/cancellation flows call: one transaction composes the
//!   base record insert, the ledger reserve and the TTL upsert, so nothing
//!   is persisted when any step fails.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = resvctl::config::Args::parse();
//!     let config = resvctl::Config::load(&args)?;
//!     resvctl::telemetry::init_telemetry()?;
//!
//!     let pool = sqlx::postgres::PgPoolOptions::new()
//!         .max_connections(config.max_connections)
//!         .connect(&config.database_url)
//!         .await?;
//!     resvctl::migrator().run(&pool).await?;
//!
//!     let policies = config.policy_cache.build();
//!     let processor = resvctl::ExpirationProcessor::start(
//!         pool.clone(),
//!         policies.clone(),
//!         Arc::new(resvctl::LogNotifier),
//!         config.processor.clone(),
//!     );
//!
//!     tokio::signal::ctrl_c().await?;
//!     processor.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Database Setup
//!
//! The engine requires PostgreSQL and runs its migrations on startup:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::migrate::MigrateError> {
//! resvctl::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```

pub mod booking;
pub mod config;
pub mod db;
pub mod errors;
pub mod notifications;
pub mod policy_store;
pub mod processor;
pub mod telemetry;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use booking::{BookingService, CreateReservationInput, CreatedReservation};
pub use config::Config;
pub use errors::{Error, Result};
pub use notifications::{LogNotifier, Notification, Notifier};
pub use policy_store::PolicyStore;
pub use processor::ExpirationProcessor;

/// Get the resvctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}
