//! Database record structures matching table schemas.
//!
//! Each submodule holds the `FromRow` entity for one table plus the
//! create/update request structs its repository accepts. Nested settings
//! (warning schedules, notification toggles, service-type scopes) are typed
//! columns on the entity, never serialized JSON blobs.

pub mod inventory;
pub mod policies;
pub mod reservation_ttls;
pub mod reservations;
