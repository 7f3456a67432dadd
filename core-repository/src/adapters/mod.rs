//! Persistence backend implementations
//!
//! This module contains concrete implementations of the `PersistenceBackend`
//! trait. The in-memory backend is always available; the SQLite backend is
//! behind the `sqlite` feature.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite_native;

pub use memory::MemoryBackend;

#[cfg(feature = "sqlite")]
pub use sqlite_native::SqliteAdapter;
