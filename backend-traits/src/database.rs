//! Persistence Backend Abstraction
//!
//! Provides the capability trait the repository layer consumes to reach a
//! row-oriented store. The repository never talks to a driver directly; it
//! builds [`Query`] values and hands them to a [`PersistenceBackend`]
//! together with per-call [`BackendOptions`].
//!
//! ## Design Philosophy
//!
//! Backends signal the "nothing happened" outcomes through dedicated error
//! variants instead of empty results whenever the caller asked for a strict
//! call (`require`):
//!
//! | Call | Strict outcome when nothing matches |
//! |------|-------------------------------------|
//! | `fetch_one` / `fetch_all` | [`BackendError::EmptyResponse`] |
//! | `update` | [`BackendError::NoRowsUpdated`] |
//! | `delete` | [`BackendError::NoRowsDeleted`] |
//!
//! Without `require` the same calls return `None`, an empty vector, or `0`.
//!
//! ## Usage
//!
//! ```ignore
//! use backend_traits::database::{BackendOptions, PersistenceBackend};
//! use backend_traits::query::{Criteria, Query};
//!
//! let query = Query::new("users").filter(Criteria::new().with("is_deleted", false));
//! let rows = backend.fetch_all(&query, &BackendOptions::default()).await?;
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BackendError, Result};
use crate::query::{Criteria, Query};

// =============================================================================
// Configuration
// =============================================================================

/// Connection configuration for SQL-backed implementations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Database file path or connection string
    pub database_url: String,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,

    /// Prepared statement cache capacity (0 disables caching)
    pub statement_cache_capacity: usize,
}

impl DatabaseConfig {
    /// Create a configuration for the database file at `database_path`
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        Self {
            database_url: format!("sqlite:{}", path.display()),
            ..Self::in_memory()
        }
    }

    /// Create a configuration for an in-memory database
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            statement_cache_capacity: 100,
        }
    }

    /// Set the minimum number of connections
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Set the maximum number of connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the connection acquire timeout
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the statement cache capacity
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }

    /// Whether the URL points at a private in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

// =============================================================================
// Values and Rows
// =============================================================================

/// Represents a single row as a map of column names to values
pub type QueryRow = std::collections::HashMap<String, QueryValue>;

/// A database value that can be null, integer, real, text, boolean, or blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Blob(Vec<u8>),
}

impl QueryValue {
    /// Convert to i64 if possible (booleans map to 0/1)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            QueryValue::Integer(i) => Some(*i),
            QueryValue::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Convert to f64 if possible
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            QueryValue::Real(r) => Some(*r),
            QueryValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Convert to bool if possible (integers 0 and 1 are accepted)
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            QueryValue::Boolean(b) => Some(*b),
            QueryValue::Integer(0) => Some(false),
            QueryValue::Integer(1) => Some(true),
            _ => None,
        }
    }

    /// Borrow as str if possible
    pub fn as_str(&self) -> Option<&str> {
        match self {
            QueryValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Borrow as bytes if possible
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            QueryValue::Blob(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, QueryValue::Null)
    }

    /// SQL equality: booleans compare as 0/1, numbers compare numerically and
    /// `NULL` never equals anything.
    pub fn matches_value(&self, other: &QueryValue) -> bool {
        match (self, other) {
            (QueryValue::Null, _) | (_, QueryValue::Null) => false,
            (QueryValue::Text(a), QueryValue::Text(b)) => a == b,
            (QueryValue::Blob(a), QueryValue::Blob(b)) => a == b,
            (QueryValue::Text(_) | QueryValue::Blob(_), _)
            | (_, QueryValue::Text(_) | QueryValue::Blob(_)) => false,
            (a, b) => match (a.numeric(), b.numeric()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    fn numeric(&self) -> Option<f64> {
        match self {
            QueryValue::Integer(i) => Some(*i as f64),
            QueryValue::Real(r) => Some(*r),
            QueryValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryValue::Null => write!(f, "NULL"),
            QueryValue::Integer(i) => write!(f, "{}", i),
            QueryValue::Real(r) => write!(f, "{}", r),
            QueryValue::Text(s) => write!(f, "{}", s),
            QueryValue::Boolean(b) => write!(f, "{}", b),
            QueryValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        QueryValue::Integer(value)
    }
}

impl From<i32> for QueryValue {
    fn from(value: i32) -> Self {
        QueryValue::Integer(i64::from(value))
    }
}

impl From<u32> for QueryValue {
    fn from(value: u32) -> Self {
        QueryValue::Integer(i64::from(value))
    }
}

impl From<f64> for QueryValue {
    fn from(value: f64) -> Self {
        QueryValue::Real(value)
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        QueryValue::Boolean(value)
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Text(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Text(value)
    }
}

impl From<Vec<u8>> for QueryValue {
    fn from(value: Vec<u8>) -> Self {
        QueryValue::Blob(value)
    }
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(QueryValue::Null)
    }
}

// =============================================================================
// Call Options
// =============================================================================

/// Unique identifier for a backend transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Options attached to a single backend call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendOptions {
    /// Turn "nothing matched" into an error (see module docs)
    pub require: bool,
    /// Log the generated statement at info level
    pub debug: bool,
    /// Run the call inside this transaction
    pub transaction: Option<TransactionId>,
}

impl BackendOptions {
    /// Same options with `require` switched on
    pub fn required(self) -> Self {
        Self {
            require: true,
            ..self
        }
    }

    /// Same options with `require` switched off
    pub fn lenient(self) -> Self {
        Self {
            require: false,
            ..self
        }
    }
}

// =============================================================================
// Relations
// =============================================================================

/// How a related table hangs off its parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    /// Related rows carry `foreign_key` pointing at the parent's `references` column
    HasMany { foreign_key: String },
    /// The parent carries `foreign_key` pointing at the related row's `references` column
    BelongsTo { foreign_key: String },
}

/// A named relation that can be eager-loaded alongside a parent row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Name used to request the relation and to nest the loaded data
    pub name: String,
    /// Related table
    pub table: String,
    /// Relation shape
    pub kind: RelationKind,
    /// Key column on the "one" side of the relation
    pub references: String,
}

impl Relation {
    pub fn has_many(
        name: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            kind: RelationKind::HasMany {
                foreign_key: foreign_key.into(),
            },
            references: "id".to_string(),
        }
    }

    pub fn belongs_to(
        name: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            kind: RelationKind::BelongsTo {
                foreign_key: foreign_key.into(),
            },
            references: "id".to_string(),
        }
    }

    /// Override the key column on the "one" side (defaults to `id`)
    pub fn references(mut self, column: impl Into<String>) -> Self {
        self.references = column.into();
        self
    }
}

/// Rows loaded for one relation of one parent row
#[derive(Debug, Clone, PartialEq)]
pub enum RelatedRows {
    One(Option<QueryRow>),
    Many(Vec<QueryRow>),
}

// =============================================================================
// Persistence Backend Trait
// =============================================================================

/// Row-oriented persistence capability consumed by the repository layer
///
/// ## Thread Safety
///
/// Implementations are shared across concurrent callers behind an `Arc` and
/// must be `Send + Sync`.
///
/// ## Transaction Support
///
/// `begin_transaction` hands out a [`TransactionId`]; every call whose
/// [`BackendOptions::transaction`] carries that id must run inside the same
/// transaction until it is committed or rolled back. An id that is not open
/// yields [`BackendError::UnknownTransaction`].
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Fetch the first row matching the query
    ///
    /// Returns `Ok(None)` when nothing matches, or
    /// [`BackendError::EmptyResponse`] when `options.require` is set.
    async fn fetch_one(&self, query: &Query, options: &BackendOptions) -> Result<Option<QueryRow>>;

    /// Fetch every row matching the query
    ///
    /// An empty result is [`BackendError::EmptyResponse`] when
    /// `options.require` is set.
    async fn fetch_all(&self, query: &Query, options: &BackendOptions) -> Result<Vec<QueryRow>>;

    /// Insert a row into `query.table` and return it as stored, including
    /// generated columns
    async fn insert(
        &self,
        query: &Query,
        values: &QueryRow,
        options: &BackendOptions,
    ) -> Result<QueryRow>;

    /// Apply `values` to every row matching the query
    ///
    /// Returns the number of rows affected; zero rows is
    /// [`BackendError::NoRowsUpdated`] when `options.require` is set.
    async fn update(&self, query: &Query, values: &QueryRow, options: &BackendOptions)
        -> Result<u64>;

    /// Delete every row matching the query
    ///
    /// Returns the number of rows removed; zero rows is
    /// [`BackendError::NoRowsDeleted`] when `options.require` is set.
    async fn delete(&self, query: &Query, options: &BackendOptions) -> Result<u64>;

    /// Begin a new transaction
    async fn begin_transaction(&self) -> Result<TransactionId>;

    /// Commit a transaction
    async fn commit_transaction(&self, transaction_id: TransactionId) -> Result<()>;

    /// Rollback a transaction
    async fn rollback_transaction(&self, transaction_id: TransactionId) -> Result<()>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> Result<()>;

    /// Load one relation for one parent row
    ///
    /// The default implementation issues a single equality lookup on the
    /// related table with the caller's transaction and debug settings. Strict
    /// mode never applies to relation lookups: a missing relation is an empty
    /// result, not an error.
    async fn fetch_related(
        &self,
        relation: &Relation,
        parent: &QueryRow,
        options: &BackendOptions,
    ) -> Result<RelatedRows> {
        let options = options.lenient();

        match &relation.kind {
            RelationKind::HasMany { foreign_key } => {
                let key = match parent.get(&relation.references) {
                    Some(value) if !value.is_null() => value.clone(),
                    _ => return Ok(RelatedRows::Many(Vec::new())),
                };
                let query = Query::new(relation.table.clone())
                    .filter(Criteria::new().with(foreign_key.clone(), key));
                Ok(RelatedRows::Many(self.fetch_all(&query, &options).await?))
            }
            RelationKind::BelongsTo { foreign_key } => {
                let key = match parent.get(foreign_key) {
                    Some(value) if !value.is_null() => value.clone(),
                    _ => return Ok(RelatedRows::One(None)),
                };
                let query = Query::new(relation.table.clone())
                    .id_column(relation.references.clone())
                    .filter(Criteria::new().with(relation.references.clone(), key));
                Ok(RelatedRows::One(self.fetch_one(&query, &options).await?))
            }
        }
    }
}

/// Reject identifiers that cannot be used verbatim as table or column names
///
/// Only ASCII letters, digits and underscores are allowed, and the first
/// character may not be a digit.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    let mut chars = identifier.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(BackendError::InvalidQuery(format!(
            "Invalid identifier: {:?}",
            identifier
        )))
    }
}
