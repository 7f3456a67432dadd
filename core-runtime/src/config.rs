//! # Core Configuration Module
//!
//! Provides configuration management for the repository layer.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds the database connection settings, the logging setup and
//! the entity conventions every repository starts from. It enforces fail-fast
//! validation so that a misconfigured host is rejected before the first query.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, NamingConvention};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/store.db")
//!     .max_connections(8)
//!     .naming_convention(NamingConvention::SnakeCase)
//!     .delete_flag("removed")
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // This will panic with an actionable error message
//! let config = CoreConfig::builder()
//!     .build()
//!     .expect("Should fail - missing database location");
//! ```

use crate::error::{Error, Result};
use crate::logging::LoggingConfig;
use backend_traits::DatabaseConfig;
use std::path::PathBuf;
use std::time::Duration;

/// How caller-facing field names map onto backend column names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingConvention {
    /// `createdDate` is stored as `created_date`
    #[default]
    SnakeCase,
    /// Field names are used as column names unchanged
    Identity,
}

/// Field-name defaults applied to every entity schema unless overridden
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityConventions {
    /// Naming convention between fields and columns
    pub naming: NamingConvention,

    /// Identifier field name
    pub id_field: String,

    /// Creation timestamp field (`None` disables it)
    pub created_field: Option<String>,

    /// Last-update timestamp field (`None` disables it)
    pub updated_field: Option<String>,

    /// Soft-delete flag field (`None` means hard deletion by default)
    pub delete_flag: Option<String>,
}

impl Default for EntityConventions {
    fn default() -> Self {
        Self {
            naming: NamingConvention::SnakeCase,
            id_field: "id".to_string(),
            created_field: Some("createdDate".to_string()),
            updated_field: Some("lastUpdatedDate".to_string()),
            delete_flag: Some("isDeleted".to_string()),
        }
    }
}

impl EntityConventions {
    /// Validates the conventions
    ///
    /// Field names must be non-empty, contain only ASCII letters, digits and
    /// underscores, and be distinct from one another.
    pub fn validate(&self) -> Result<()> {
        let mut seen: Vec<&str> = Vec::new();
        let named = [
            ("id field", Some(self.id_field.as_str())),
            ("creation timestamp field", self.created_field.as_deref()),
            ("update timestamp field", self.updated_field.as_deref()),
            ("delete flag", self.delete_flag.as_deref()),
        ];

        for (role, name) in named {
            let Some(name) = name else { continue };

            if name.is_empty() {
                return Err(Error::Config(format!("The {} name cannot be empty", role)));
            }

            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(Error::Config(format!(
                    "The {} name '{}' may only contain letters, digits and underscores",
                    role, name
                )));
            }

            if seen.contains(&name) {
                return Err(Error::Config(format!(
                    "Field '{}' is used for more than one convention. \
                     Give the {} a distinct name.",
                    name, role
                )));
            }
            seen.push(name);
        }

        Ok(())
    }
}

/// Core configuration for the repository layer.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Database connection settings
    pub database: DatabaseConfig,

    /// Logging setup
    pub logging: LoggingConfig,

    /// Entity conventions shared by every repository
    pub conventions: EntityConventions,
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database URL is not empty
    /// - Connection limits are consistent (0 < min <= max)
    /// - Acquire timeout is non-zero
    /// - Entity conventions are usable as column names
    pub fn validate(&self) -> Result<()> {
        if self.database.database_url.trim().is_empty() {
            return Err(Error::Config("Database URL cannot be empty".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(Error::Config(
                "Maximum connections must be greater than 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(Error::Config(format!(
                "Minimum connections ({}) exceeds maximum connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.database.acquire_timeout.is_zero() {
            return Err(Error::Config(
                "Acquire timeout must be greater than 0".to_string(),
            ));
        }

        self.conventions.validate()
    }
}

/// Builder for constructing [`CoreConfig`] instances.
///
/// Use this builder to incrementally set configuration options and then
/// call [`build()`](CoreConfigBuilder::build) to create the final config.
#[derive(Debug, Default)]
pub struct CoreConfigBuilder {
    database_url: Option<String>,
    min_connections: Option<u32>,
    max_connections: Option<u32>,
    acquire_timeout: Option<Duration>,
    statement_cache_capacity: Option<usize>,
    logging: Option<LoggingConfig>,
    conventions: EntityConventions,
}

impl CoreConfigBuilder {
    /// Sets the database file path.
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .database_path("/path/to/store.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_url = Some(DatabaseConfig::new(path).database_url);
        self
    }

    /// Sets a full database URL (e.g. `sqlite::memory:`).
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Uses a private in-memory database.
    pub fn in_memory(self) -> Self {
        self.database_url(DatabaseConfig::in_memory().database_url)
    }

    /// Sets the minimum pool size.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = Some(min);
        self
    }

    /// Sets the maximum pool size.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Sets how long to wait for a pooled connection.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Sets the prepared statement cache capacity.
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = Some(capacity);
        self
    }

    /// Sets the logging configuration.
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Sets the naming convention between fields and columns.
    pub fn naming_convention(mut self, naming: NamingConvention) -> Self {
        self.conventions.naming = naming;
        self
    }

    /// Sets the default identifier field name.
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.conventions.id_field = field.into();
        self
    }

    /// Sets the default timestamp field names.
    pub fn timestamp_fields(
        mut self,
        created: impl Into<String>,
        updated: impl Into<String>,
    ) -> Self {
        self.conventions.created_field = Some(created.into());
        self.conventions.updated_field = Some(updated.into());
        self
    }

    /// Disables timestamp bookkeeping by default.
    pub fn without_timestamps(mut self) -> Self {
        self.conventions.created_field = None;
        self.conventions.updated_field = None;
        self
    }

    /// Sets the default soft-delete flag field name.
    pub fn delete_flag(mut self, field: impl Into<String>) -> Self {
        self.conventions.delete_flag = Some(field.into());
        self
    }

    /// Makes hard deletion the default for new schemas.
    pub fn hard_delete_by_default(mut self) -> Self {
        self.conventions.delete_flag = None;
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(CoreConfig)` on success, or an error if:
    /// - No database location was given
    /// - Connection limits are inconsistent
    /// - Entity conventions are unusable as column names
    pub fn build(self) -> Result<CoreConfig> {
        let database_url = self.database_url.ok_or_else(|| {
            Error::Config(
                "Database location is required. Use .database_path(), .database_url() \
                 or .in_memory() to set it."
                    .to_string(),
            )
        })?;

        let defaults = DatabaseConfig::in_memory();
        let database = DatabaseConfig {
            database_url,
            min_connections: self.min_connections.unwrap_or(defaults.min_connections),
            max_connections: self.max_connections.unwrap_or(defaults.max_connections),
            acquire_timeout: self.acquire_timeout.unwrap_or(defaults.acquire_timeout),
            statement_cache_capacity: self
                .statement_cache_capacity
                .unwrap_or(defaults.statement_cache_capacity),
        };

        let config = CoreConfig {
            database,
            logging: self.logging.unwrap_or_default(),
            conventions: self.conventions,
        };

        config.validate()?;

        Ok(config)
    }
}
