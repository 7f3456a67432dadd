//! Workspace facade crate.
//!
//! Re-exports the member crates so host applications can depend on a single
//! package: the persistence backend contract (`backend_traits`), the ambient
//! runtime (`core_runtime`) and the soft-delete-aware repository layer
//! (`core_repository`). The `sqlite` feature (on by default) pulls in the
//! sqlx-backed adapter.

pub use backend_traits;
pub use core_repository;
pub use core_runtime;
