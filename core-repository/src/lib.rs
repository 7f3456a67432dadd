//! # Soft-Delete Aware Repository
//!
//! A generic repository over any [`PersistenceBackend`](backend_traits::PersistenceBackend).
//!
//! ## Overview
//!
//! This module provides:
//! - Entity schemas describing table, id, timestamps, and deletion strategy
//! - Fluent per-call options (transaction, related, require, debug,
//!   include removed)
//! - Automatic soft-delete filtering on every read and update
//! - Translation of backend failures into a small set of repository errors
//! - An in-memory backend and a native SQLite backend
//!
//! ## Usage
//!
//! ```ignore
//! use core_repository::{EntitySchema, MemoryBackend, Repository};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let repo = Repository::new(
//!     Arc::new(MemoryBackend::new()),
//!     EntitySchema::new("Publisher", "publishers"),
//! );
//!
//! let created = repo.insert(json!({"name": "DC"}).as_object().cloned().unwrap()).await?;
//! let live = repo.find_all().await?;
//! let everything = repo.include_removed(true).find_all().await?;
//! ```

pub mod adapters;
pub mod error;
pub mod naming;
pub mod options;
pub mod predicate;
pub mod record;
pub mod relations;
pub mod repository;
pub mod schema;

pub use adapters::MemoryBackend;
#[cfg(feature = "sqlite")]
pub use adapters::SqliteAdapter;
pub use error::{normalize, RepositoryError, RepositoryErrorKind, RepositoryOperation, Result};
pub use options::CallOptions;
pub use record::Record;
pub use repository::{Repository, ScopedRepository};
pub use schema::{DeletionStrategy, EntitySchema, IdGeneration, Timestamps};
