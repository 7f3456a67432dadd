//! # Backend Traits
//!
//! Capability traits the repository layer requires from its host.
//!
//! ## Overview
//!
//! This crate defines the contract between the repository layer and the
//! storage engines it runs on. The repository builds queries and interprets
//! outcomes; a backend executes them.
//!
//! ## Traits
//!
//! - [`PersistenceBackend`](database::PersistenceBackend) - Row-oriented fetch,
//!   insert, update, delete and transactions
//! - [`Clock`](time::Clock) - Time source for deterministic timestamp tests
//!
//! [`LogLevel`](time::LogLevel) is shared with the runtime's logging setup.
//!
//! ## Backends
//!
//! | Backend | Location | Notes |
//! |---------|----------|-------|
//! | In-memory | `core-repository::adapters::memory` | Snapshot transactions, used by tests |
//! | SQLite | `core-repository::adapters::sqlite_native` | sqlx pool, `sqlite` feature |
//!
//! ## Error Handling
//!
//! Backends report failures with [`BackendError`](error::BackendError). The
//! "nothing matched" outcomes (`EmptyResponse`, `NoRowsUpdated`,
//! `NoRowsDeleted`) are distinct variants so the repository can translate
//! them into domain errors; driver failures should be converted into the
//! closest remaining variant with an actionable message.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync` so a single backend can be shared behind
//! an `Arc` by concurrent callers.

pub mod database;
pub mod error;
pub mod query;
pub mod time;

pub use error::BackendError;

// Re-export commonly used types
pub use database::{
    validate_identifier, BackendOptions, DatabaseConfig, PersistenceBackend, QueryRow,
    QueryValue, RelatedRows, Relation, RelationKind, TransactionId,
};
pub use query::{Criteria, Query};
pub use time::{Clock, LogLevel, ManualClock, SystemClock};
