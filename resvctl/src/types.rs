//! Common type definitions shared across the engine.
//!
//! All entity IDs are UUIDs wrapped in type aliases for better type safety:
//!
//! - [`BusinessId`]: owning business identifier
//! - [`ReservationId`]: reservation identifier
//! - [`ProductId`]: product identifier (keys the stock counters)
//! - [`PolicyId`]: expiration policy identifier
//! - [`HoldId`]: inventory hold identifier
//! - [`ServiceTypeId`]: service type identifier used for policy scoping

use uuid::Uuid;

// Type aliases for IDs
pub type BusinessId = Uuid;
pub type ReservationId = Uuid;
pub type ProductId = Uuid;
pub type PolicyId = Uuid;
pub type HoldId = Uuid;
pub type ServiceTypeId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}
