use crate::db::errors::DbError;
use crate::types::ProductId;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// A reserve could not be satisfied. This is a business rejection the
    /// caller surfaces to the customer, not a fault.
    #[error("Insufficient inventory for product {product_id}: requested {requested}, available {available}")]
    InsufficientInventory {
        product_id: ProductId,
        requested: i32,
        available: i32,
    },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// True when the error is an expected business rejection rather than a
    /// storage or programming fault. Callers use this to decide between a
    /// customer-facing message and an alert.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::InsufficientInventory { .. } | Error::BadRequest { .. } | Error::NotFound { .. }
        )
    }
}

/// Lift storage errors through the [`DbError`] categorization so handler code
/// can use `?` on raw sqlx calls.
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database(DbError::from(err))
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
