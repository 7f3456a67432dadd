use thiserror::Error;

/// Failure signals raised by a persistence backend.
///
/// The first three variants are the distinguishable "nothing happened"
/// conditions the repository layer relies on; the rest describe why a call
/// failed outright.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Query returned no rows where one was required")]
    EmptyResponse,

    #[error("Update statement affected no rows")]
    NoRowsUpdated,

    #[error("Delete statement affected no rows")]
    NoRowsDeleted,

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(u64),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Backend capability not available: {0}")]
    NotAvailable(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;
