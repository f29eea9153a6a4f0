//! Repository implementations for database access.
//!
//! This module provides repository structs for each core entity. Each
//! repository:
//!
//! - Wraps a SQLx connection or transaction
//! - Provides strongly-typed operations
//! - Handles query construction and parameter binding
//! - Returns domain models from [`crate::db::models`]
//! - Uses the connection's transaction for ACID guarantees
//!
//! # Available Repositories
//!
//! - [`Inventory`]: per-product stock counters and hold lifecycle (the
//!   inventory ledger; every mutation goes through its locked transactions)
//! - [`ExpirationPolicies`]: business expiration policy configuration
//! - [`ReservationTtls`]: per-reservation expiry timestamps and lifecycle
//!   status
//! - [`Reservations`]: the base reservation record's status fields

pub mod inventory;
pub mod policies;
pub mod repository;
pub mod reservation_ttls;
pub mod reservations;

pub use inventory::Inventory;
pub use policies::ExpirationPolicies;
pub use repository::Repository;
pub use reservation_ttls::ReservationTtls;
pub use reservations::Reservations;
