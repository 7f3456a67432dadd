//! Repository error taxonomy
//!
//! Every repository operation reports failures through [`RepositoryError`].
//! Backend failures are translated by [`normalize`], the single mapping
//! function invoked at the tail of every operation, so driver-specific error
//! types never escape the repository untyped.
//!
//! # Example
//!
//! ```rust
//! use backend_traits::BackendError;
//! use core_repository::error::{normalize, RepositoryErrorKind, RepositoryOperation};
//!
//! let error = normalize("User", RepositoryOperation::FindById, BackendError::EmptyResponse);
//! assert_eq!(error.kind(), RepositoryErrorKind::NotFound);
//! assert_eq!(error.cause(), &BackendError::EmptyResponse);
//! ```

use backend_traits::BackendError;
use std::fmt;
use thiserror::Error;

/// Operation being performed when the repository error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// Creating a new entity
    Insert,
    /// Listing every visible entity
    FindAll,
    /// Finding a single entity by ID
    FindById,
    /// Listing entities matching criteria
    FindByCriteria,
    /// Finding the first entity matching criteria
    FindOneByCriteria,
    /// Patching an existing entity
    UpdateById,
    /// Retiring or destroying an entity
    RemoveById,
    /// Beginning, committing or rolling back a transaction
    Transaction,
}

impl RepositoryOperation {
    /// Whether the operation removes entities
    pub fn is_removal(&self) -> bool {
        matches!(self, Self::RemoveById)
    }
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::FindAll => write!(f, "find_all"),
            Self::FindById => write!(f, "find_by_id"),
            Self::FindByCriteria => write!(f, "find_by_criteria"),
            Self::FindOneByCriteria => write!(f, "find_one_by_criteria"),
            Self::UpdateById => write!(f, "update_by_id"),
            Self::RemoveById => write!(f, "remove_by_id"),
            Self::Transaction => write!(f, "transaction"),
        }
    }
}

/// Category of repository error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// No visible entity matched
    NotFound,
    /// The patch affected no rows
    NotUpdated,
    /// The removal affected no rows
    NotRemoved,
    /// The data was rejected before or by the backend
    Validation,
    /// Any other backend failure
    Backend,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::NotUpdated => write!(f, "not_updated"),
            Self::NotRemoved => write!(f, "not_removed"),
            Self::Validation => write!(f, "validation"),
            Self::Backend => write!(f, "backend"),
        }
    }
}

/// Domain error returned by repository operations
///
/// Every variant carries the entity name, the operation that failed and the
/// original backend failure as its source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("{entity} not found during {operation}")]
    NotFound {
        entity: String,
        operation: RepositoryOperation,
        #[source]
        source: BackendError,
    },

    #[error("{entity} was not updated during {operation}")]
    NotUpdated {
        entity: String,
        operation: RepositoryOperation,
        #[source]
        source: BackendError,
    },

    #[error("{entity} was not removed during {operation}")]
    NotRemoved {
        entity: String,
        operation: RepositoryOperation,
        #[source]
        source: BackendError,
    },

    #[error("Invalid {entity} data during {operation}: {source}")]
    Validation {
        entity: String,
        operation: RepositoryOperation,
        #[source]
        source: BackendError,
    },

    #[error("Repository failure for {entity} during {operation}: {source}")]
    Backend {
        entity: String,
        operation: RepositoryOperation,
        #[source]
        source: BackendError,
    },
}

impl RepositoryError {
    /// Build an error of the given kind
    pub fn new(
        kind: RepositoryErrorKind,
        entity: impl Into<String>,
        operation: RepositoryOperation,
        source: BackendError,
    ) -> Self {
        let entity = entity.into();
        match kind {
            RepositoryErrorKind::NotFound => Self::NotFound {
                entity,
                operation,
                source,
            },
            RepositoryErrorKind::NotUpdated => Self::NotUpdated {
                entity,
                operation,
                source,
            },
            RepositoryErrorKind::NotRemoved => Self::NotRemoved {
                entity,
                operation,
                source,
            },
            RepositoryErrorKind::Validation => Self::Validation {
                entity,
                operation,
                source,
            },
            RepositoryErrorKind::Backend => Self::Backend {
                entity,
                operation,
                source,
            },
        }
    }

    pub fn kind(&self) -> RepositoryErrorKind {
        match self {
            Self::NotFound { .. } => RepositoryErrorKind::NotFound,
            Self::NotUpdated { .. } => RepositoryErrorKind::NotUpdated,
            Self::NotRemoved { .. } => RepositoryErrorKind::NotRemoved,
            Self::Validation { .. } => RepositoryErrorKind::Validation,
            Self::Backend { .. } => RepositoryErrorKind::Backend,
        }
    }

    pub fn entity(&self) -> &str {
        match self {
            Self::NotFound { entity, .. }
            | Self::NotUpdated { entity, .. }
            | Self::NotRemoved { entity, .. }
            | Self::Validation { entity, .. }
            | Self::Backend { entity, .. } => entity,
        }
    }

    pub fn operation(&self) -> RepositoryOperation {
        match self {
            Self::NotFound { operation, .. }
            | Self::NotUpdated { operation, .. }
            | Self::NotRemoved { operation, .. }
            | Self::Validation { operation, .. }
            | Self::Backend { operation, .. } => *operation,
        }
    }

    /// The backend failure this error was translated from
    pub fn cause(&self) -> &BackendError {
        match self {
            Self::NotFound { source, .. }
            | Self::NotUpdated { source, .. }
            | Self::NotRemoved { source, .. }
            | Self::Validation { source, .. }
            | Self::Backend { source, .. } => source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == RepositoryErrorKind::NotFound
    }
}

/// Translate a backend failure into the domain taxonomy
///
/// The narrow checks run before the catch-all:
///
/// | Backend signal | Domain error |
/// |----------------|--------------|
/// | `EmptyResponse` | `NotFound` |
/// | `NoRowsUpdated` during a removal | `NotRemoved` |
/// | `NoRowsUpdated` otherwise | `NotUpdated` |
/// | `NoRowsDeleted` | `NotRemoved` |
/// | `ConstraintViolation`, `InvalidValue` | `Validation` |
/// | anything else | `Backend` |
pub fn normalize(
    entity: &str,
    operation: RepositoryOperation,
    error: BackendError,
) -> RepositoryError {
    let kind = match &error {
        BackendError::EmptyResponse => RepositoryErrorKind::NotFound,
        BackendError::NoRowsUpdated if operation.is_removal() => RepositoryErrorKind::NotRemoved,
        BackendError::NoRowsUpdated => RepositoryErrorKind::NotUpdated,
        BackendError::NoRowsDeleted => RepositoryErrorKind::NotRemoved,
        BackendError::ConstraintViolation(_) | BackendError::InvalidValue { .. } => {
            RepositoryErrorKind::Validation
        }
        _ => RepositoryErrorKind::Backend,
    };

    RepositoryError::new(kind, entity, operation, error)
}

pub type Result<T> = std::result::Result<T, RepositoryError>;
