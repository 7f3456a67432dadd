//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the repository layer:
//! - Logging and tracing infrastructure
//! - Configuration management
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the other workspace crates
//! depend on. It establishes the logging conventions and the entity
//! conventions (naming, id, timestamps, soft-delete flag) that repositories
//! are seeded from.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder, EntityConventions, NamingConvention};
pub use error::{Error, Result};
