//! Native SQLite Persistence Backend
//!
//! Implements the `PersistenceBackend` trait using `sqlx` with the native
//! SQLite driver.
//!
//! ## Features
//!
//! - Connection pooling with configurable limits
//! - WAL mode for better concurrency
//! - Prepared statement caching
//! - Foreign key enforcement
//! - Parameterized statements; table and column names are validated
//!   identifiers, never caller text spliced into SQL
//! - Transactions pinned to a dedicated pooled connection until commit or
//!   rollback, each behind its own lock so open transactions run side by side

use async_trait::async_trait;
use backend_traits::database::{
    validate_identifier, BackendOptions, DatabaseConfig, PersistenceBackend, QueryRow, QueryValue,
    TransactionId,
};
use backend_traits::error::{BackendError, Result};
use backend_traits::query::{Criteria, Query};
use core_runtime::logging::strip_path;
use sqlx::error::ErrorKind;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Column, Pool, Row, Sqlite, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// An open transaction; `None` once commit or rollback has taken it
type TransactionSlot = Arc<Mutex<Option<Transaction<'static, Sqlite>>>>;

/// Native SQLite implementation of PersistenceBackend
///
/// This adapter wraps a `sqlx::Pool<Sqlite>`. Open transactions each hold
/// one pooled connection, so a pool with a single connection cannot serve
/// un-transacted calls while a transaction is open.
pub struct SqliteAdapter {
    pool: Pool<Sqlite>,
    transaction_counter: Arc<AtomicU64>,
    transactions: Mutex<HashMap<u64, TransactionSlot>>,
}

impl SqliteAdapter {
    /// Create a new SqliteAdapter with the given configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Database configuration
    ///
    /// # Errors
    ///
    /// Returns error if connection pool creation fails
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        info!(
            database = %strip_path(&config.database_url),
            min_connections = config.min_connections,
            max_connections = config.max_connections,
            "Creating SQLite persistence backend"
        );

        let mut connect_options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| BackendError::DatabaseError(format!("Invalid database URL: {}", e)))?;

        connect_options = connect_options
            // Enable WAL mode for better concurrency
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .create_if_missing(true)
            .pragma("cache_size", "-64000");

        if config.statement_cache_capacity > 0 {
            connect_options =
                connect_options.statement_cache_capacity(config.statement_cache_capacity);
        }

        debug!("SQLite connection options configured");

        let pool = SqlitePoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(connect_options)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to create connection pool");
                BackendError::NotAvailable(format!("Connection pool creation failed: {}", e))
            })?;

        info!(
            connections = pool.size(),
            "SQLite connection pool created successfully"
        );

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            transaction_counter: Arc::new(AtomicU64::new(0)),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Execute a single schema or maintenance statement outside any
    /// transaction
    pub async fn execute(&self, statement: &str) -> Result<u64> {
        debug!(statement = %statement, "Executing statement");

        let result = sqlx::query(statement)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    /// Close the pool, rolling back any transaction still open
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.transactions.lock().await.clear();
        self.pool.close().await;
    }

    /// The slot for transaction `id`; the map lock is released on return
    async fn transaction_slot(&self, id: u64) -> Result<TransactionSlot> {
        self.transactions
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(BackendError::UnknownTransaction(id))
    }

    /// Remove transaction `id` and take it once no statement holds it
    async fn take_transaction(&self, id: u64) -> Result<Transaction<'static, Sqlite>> {
        let slot = self
            .transactions
            .lock()
            .await
            .remove(&id)
            .ok_or(BackendError::UnknownTransaction(id))?;
        let tx = slot.lock().await.take();
        tx.ok_or(BackendError::UnknownTransaction(id))
    }

    /// Convert a sqlx Row to a QueryRow (HashMap)
    fn row_to_query_row(row: &SqliteRow) -> QueryRow {
        let mut result = HashMap::new();

        for column in row.columns() {
            let column_name = column.name().to_string();

            let value = if let Ok(v) = row.try_get::<Option<i64>, _>(column.ordinal()) {
                v.map(QueryValue::Integer).unwrap_or(QueryValue::Null)
            } else if let Ok(v) = row.try_get::<Option<f64>, _>(column.ordinal()) {
                v.map(QueryValue::Real).unwrap_or(QueryValue::Null)
            } else if let Ok(v) = row.try_get::<Option<String>, _>(column.ordinal()) {
                v.map(QueryValue::Text).unwrap_or(QueryValue::Null)
            } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(column.ordinal()) {
                v.map(QueryValue::Blob).unwrap_or(QueryValue::Null)
            } else if let Ok(v) = row.try_get::<Option<bool>, _>(column.ordinal()) {
                v.map(QueryValue::Boolean).unwrap_or(QueryValue::Null)
            } else {
                QueryValue::Null
            };

            result.insert(column_name, value);
        }

        result
    }

    /// Bind QueryValue parameters in order
    fn bind_params<'q>(query: SqliteQuery<'q>, params: &[QueryValue]) -> SqliteQuery<'q> {
        let mut query = query;
        for param in params {
            query = match param {
                QueryValue::Null => query.bind(None::<i64>),
                QueryValue::Integer(i) => query.bind(*i),
                QueryValue::Real(r) => query.bind(*r),
                QueryValue::Text(s) => query.bind(s.clone()),
                QueryValue::Boolean(b) => query.bind(*b),
                QueryValue::Blob(b) => query.bind(b.clone()),
            };
        }
        query
    }

    /// `WHERE a = ? AND b = ?` (empty for no criteria) and its parameters
    fn where_clause(criteria: &Criteria) -> Result<(String, Vec<QueryValue>)> {
        if criteria.is_empty() {
            return Ok((String::new(), Vec::new()));
        }

        let mut conditions = Vec::with_capacity(criteria.len());
        let mut params = Vec::with_capacity(criteria.len());
        for (column, value) in criteria.iter() {
            validate_identifier(column)?;
            conditions.push(format!("{} = ?", column));
            params.push(value.clone());
        }

        Ok((format!(" WHERE {}", conditions.join(" AND ")), params))
    }

    fn select_sql(query: &Query, limit_one: bool) -> Result<(String, Vec<QueryValue>)> {
        validate_identifier(&query.table)?;
        let (where_sql, params) = Self::where_clause(&query.criteria)?;
        let limit = if limit_one { " LIMIT 1" } else { "" };
        Ok((
            format!("SELECT * FROM {}{}{}", query.table, where_sql, limit),
            params,
        ))
    }

    fn insert_sql(query: &Query, values: &QueryRow) -> Result<(String, Vec<QueryValue>)> {
        validate_identifier(&query.table)?;
        if values.is_empty() {
            return Ok((
                format!("INSERT INTO {} DEFAULT VALUES RETURNING *", query.table),
                Vec::new(),
            ));
        }

        let mut columns: Vec<&String> = values.keys().collect();
        columns.sort();
        for column in &columns {
            validate_identifier(column)?;
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let column_list = columns
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let params = columns.iter().map(|c| values[*c].clone()).collect();

        Ok((
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                query.table, column_list, placeholders
            ),
            params,
        ))
    }

    fn update_sql(query: &Query, values: &QueryRow) -> Result<(String, Vec<QueryValue>)> {
        validate_identifier(&query.table)?;
        if values.is_empty() {
            return Err(BackendError::InvalidQuery(
                "Update requires at least one column".to_string(),
            ));
        }

        let mut columns: Vec<&String> = values.keys().collect();
        columns.sort();
        let mut assignments = Vec::with_capacity(columns.len());
        let mut params: Vec<QueryValue> = Vec::with_capacity(columns.len());
        for column in columns {
            validate_identifier(column)?;
            assignments.push(format!("{} = ?", column));
            params.push(values[column].clone());
        }

        let (where_sql, where_params) = Self::where_clause(&query.criteria)?;
        params.extend(where_params);

        Ok((
            format!(
                "UPDATE {} SET {}{}",
                query.table,
                assignments.join(", "),
                where_sql
            ),
            params,
        ))
    }

    fn delete_sql(query: &Query) -> Result<(String, Vec<QueryValue>)> {
        validate_identifier(&query.table)?;
        let (where_sql, params) = Self::where_clause(&query.criteria)?;
        Ok((format!("DELETE FROM {}{}", query.table, where_sql), params))
    }

    fn log_statement(sql: &str, params: &[QueryValue], options: &BackendOptions) {
        let transaction = options.transaction.map(|t| t.0);
        if options.debug {
            info!(sql = %sql, params = ?params, transaction, "Executing SQL");
        } else {
            debug!(sql = %sql, param_count = params.len(), transaction, "Executing SQL");
        }
    }

    async fn fetch_rows(
        &self,
        sql: &str,
        params: &[QueryValue],
        options: &BackendOptions,
    ) -> Result<Vec<QueryRow>> {
        Self::log_statement(sql, params, options);
        let query = Self::bind_params(sqlx::query(sql), params);

        let rows = match options.transaction {
            Some(TransactionId(id)) => {
                let slot = self.transaction_slot(id).await?;
                let mut guard = slot.lock().await;
                let tx = guard.as_mut().ok_or(BackendError::UnknownTransaction(id))?;
                let result = query.fetch_all(&mut **tx).await;
                result
            }
            None => query.fetch_all(&self.pool).await,
        }
        .map_err(map_sqlx_error)?;

        Ok(rows.iter().map(Self::row_to_query_row).collect())
    }

    async fn execute_statement(
        &self,
        sql: &str,
        params: &[QueryValue],
        options: &BackendOptions,
    ) -> Result<u64> {
        Self::log_statement(sql, params, options);
        let query = Self::bind_params(sqlx::query(sql), params);

        let result = match options.transaction {
            Some(TransactionId(id)) => {
                let slot = self.transaction_slot(id).await?;
                let mut guard = slot.lock().await;
                let tx = guard.as_mut().ok_or(BackendError::UnknownTransaction(id))?;
                let result = query.execute(&mut **tx).await;
                result
            }
            None => query.execute(&self.pool).await,
        }
        .map_err(map_sqlx_error)?;

        let rows_affected = result.rows_affected();
        debug!(rows_affected, "Statement executed successfully");
        Ok(rows_affected)
    }
}

/// Translate sqlx failures into backend signals
fn map_sqlx_error(error: sqlx::Error) -> BackendError {
    match &error {
        sqlx::Error::RowNotFound => BackendError::EmptyResponse,
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => {
                BackendError::ConstraintViolation(db.message().to_string())
            }
            _ => BackendError::DatabaseError(db.message().to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            BackendError::NotAvailable(error.to_string())
        }
        _ => BackendError::DatabaseError(error.to_string()),
    }
}

#[async_trait]
impl PersistenceBackend for SqliteAdapter {
    async fn fetch_one(&self, query: &Query, options: &BackendOptions) -> Result<Option<QueryRow>> {
        let (sql, params) = Self::select_sql(query, true)?;
        let row = self.fetch_rows(&sql, &params, options).await?.into_iter().next();

        match row {
            None if options.require => Err(BackendError::EmptyResponse),
            row => Ok(row),
        }
    }

    async fn fetch_all(&self, query: &Query, options: &BackendOptions) -> Result<Vec<QueryRow>> {
        let (sql, params) = Self::select_sql(query, false)?;
        let rows = self.fetch_rows(&sql, &params, options).await?;

        if rows.is_empty() && options.require {
            return Err(BackendError::EmptyResponse);
        }
        Ok(rows)
    }

    async fn insert(
        &self,
        query: &Query,
        values: &QueryRow,
        options: &BackendOptions,
    ) -> Result<QueryRow> {
        let (sql, params) = Self::insert_sql(query, values)?;
        self.fetch_rows(&sql, &params, options)
            .await?
            .into_iter()
            .next()
            .ok_or(BackendError::EmptyResponse)
    }

    async fn update(
        &self,
        query: &Query,
        values: &QueryRow,
        options: &BackendOptions,
    ) -> Result<u64> {
        let (sql, params) = Self::update_sql(query, values)?;
        let affected = self.execute_statement(&sql, &params, options).await?;

        if affected == 0 && options.require {
            return Err(BackendError::NoRowsUpdated);
        }
        Ok(affected)
    }

    async fn delete(&self, query: &Query, options: &BackendOptions) -> Result<u64> {
        let (sql, params) = Self::delete_sql(query)?;
        let affected = self.execute_statement(&sql, &params, options).await?;

        if affected == 0 && options.require {
            return Err(BackendError::NoRowsDeleted);
        }
        Ok(affected)
    }

    async fn begin_transaction(&self) -> Result<TransactionId> {
        let tx_id = self.transaction_counter.fetch_add(1, Ordering::SeqCst);
        debug!(transaction_id = tx_id, "Beginning transaction");

        let tx = self.pool.begin().await.map_err(|e| {
            warn!(error = %e, "Begin transaction failed");
            map_sqlx_error(e)
        })?;
        self.transactions
            .lock()
            .await
            .insert(tx_id, Arc::new(Mutex::new(Some(tx))));

        Ok(TransactionId(tx_id))
    }

    async fn commit_transaction(&self, transaction_id: TransactionId) -> Result<()> {
        debug!(transaction_id = transaction_id.0, "Committing transaction");

        let tx = self.take_transaction(transaction_id.0).await?;
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback_transaction(&self, transaction_id: TransactionId) -> Result<()> {
        debug!(
            transaction_id = transaction_id.0,
            "Rolling back transaction"
        );

        let tx = self.take_transaction(transaction_id.0).await?;
        tx.rollback().await.map_err(map_sqlx_error)
    }

    async fn health_check(&self) -> Result<()> {
        debug!("Performing database health check");

        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, "Database health check failed");
                BackendError::NotAvailable(format!("Health check failed: {}", e))
            })?;

        debug!("Database health check passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_adapter() -> SqliteAdapter {
        let config = DatabaseConfig::in_memory()
            .min_connections(1)
            .max_connections(1);
        let adapter = SqliteAdapter::new(config).await.unwrap();
        adapter
            .execute(
                "CREATE TABLE test (id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 name TEXT NOT NULL, score REAL, is_deleted INTEGER NOT NULL DEFAULT 0)",
            )
            .await
            .unwrap();
        adapter
    }

    fn values(pairs: &[(&str, QueryValue)]) -> QueryRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_health_check() {
        let adapter = create_test_adapter().await;
        assert!(adapter.health_check().await.is_ok());
    }

    #[test]
    fn test_select_sql_is_parameterized() {
        let query = Query::new("test").filter(
            Criteria::new()
                .with("name", "DC")
                .with("is_deleted", false),
        );
        let (sql, params) = SqliteAdapter::select_sql(&query, true).unwrap();

        assert_eq!(
            sql,
            "SELECT * FROM test WHERE is_deleted = ? AND name = ? LIMIT 1"
        );
        assert_eq!(
            params,
            vec![QueryValue::Boolean(false), QueryValue::Text("DC".into())]
        );
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        let query = Query::new("test").filter(Criteria::new().with("name = name OR 1", 1_i64));
        assert!(matches!(
            SqliteAdapter::select_sql(&query, false),
            Err(BackendError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_returns_stored_row() {
        let adapter = create_test_adapter().await;
        let row = adapter
            .insert(
                &Query::new("test"),
                &values(&[("name", "Marvel".into()), ("score", 1.5.into())]),
                &BackendOptions::default().required(),
            )
            .await
            .unwrap();

        assert_eq!(row.get("id"), Some(&QueryValue::Integer(1)));
        assert_eq!(row.get("name"), Some(&QueryValue::Text("Marvel".into())));
        assert_eq!(row.get("score"), Some(&QueryValue::Real(1.5)));
        assert_eq!(row.get("is_deleted"), Some(&QueryValue::Integer(0)));
    }

    #[tokio::test]
    async fn test_not_null_violation_is_constraint_violation() {
        let adapter = create_test_adapter().await;
        let err = adapter
            .insert(
                &Query::new("test"),
                &values(&[("score", 2.0.into())]),
                &BackendOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_boolean_criteria_match_integer_flags() {
        let adapter = create_test_adapter().await;
        let options = BackendOptions::default();
        adapter
            .insert(&Query::new("test"), &values(&[("name", "a".into())]), &options)
            .await
            .unwrap();

        let query = Query::new("test").filter(Criteria::new().with("is_deleted", false));
        let rows = adapter.fetch_all(&query, &options).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_strict_signals() {
        let adapter = create_test_adapter().await;
        let query = Query::new("test").filter(Criteria::new().with("id", 42_i64));
        let strict = BackendOptions::default().required();

        assert_eq!(
            adapter.fetch_one(&query, &strict).await.unwrap_err(),
            BackendError::EmptyResponse
        );
        assert_eq!(
            adapter
                .update(&query, &values(&[("name", "x".into())]), &strict)
                .await
                .unwrap_err(),
            BackendError::NoRowsUpdated
        );
        assert_eq!(
            adapter.delete(&query, &strict).await.unwrap_err(),
            BackendError::NoRowsDeleted
        );
        assert_eq!(
            adapter.fetch_all(&query, &BackendOptions::default()).await.unwrap(),
            Vec::<QueryRow>::new()
        );
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let adapter = create_test_adapter().await;

        let tx_id = adapter.begin_transaction().await.unwrap();
        let options = BackendOptions {
            transaction: Some(tx_id),
            ..BackendOptions::default()
        };
        adapter
            .insert(&Query::new("test"), &values(&[("name", "a".into())]), &options)
            .await
            .unwrap();
        assert_eq!(
            adapter.fetch_all(&Query::new("test"), &options).await.unwrap().len(),
            1
        );

        adapter.rollback_transaction(tx_id).await.unwrap();

        let rows = adapter
            .fetch_all(&Query::new("test"), &BackendOptions::default())
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_transaction_commit() {
        let adapter = create_test_adapter().await;

        let tx_id = adapter.begin_transaction().await.unwrap();
        let options = BackendOptions {
            transaction: Some(tx_id),
            ..BackendOptions::default()
        };
        adapter
            .insert(&Query::new("test"), &values(&[("name", "a".into())]), &options)
            .await
            .unwrap();
        adapter.commit_transaction(tx_id).await.unwrap();

        let rows = adapter
            .fetch_all(&Query::new("test"), &BackendOptions::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            adapter.commit_transaction(tx_id).await.unwrap_err(),
            BackendError::UnknownTransaction(tx_id.0)
        );
    }

    #[tokio::test]
    async fn test_open_transactions_do_not_block_each_other() {
        let config = DatabaseConfig::in_memory()
            .min_connections(1)
            .max_connections(2);
        let adapter = SqliteAdapter::new(config).await.unwrap();
        let first = adapter.begin_transaction().await.unwrap();
        let second = adapter.begin_transaction().await.unwrap();

        // Stand-in for a long statement running on the first transaction
        let slot = adapter.transaction_slot(first.0).await.unwrap();
        let busy = slot.lock().await;

        let options = BackendOptions {
            transaction: Some(second),
            ..BackendOptions::default()
        };
        let rows = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            adapter.fetch_rows("SELECT 1 AS one", &[], &options),
        )
        .await
        .expect("second transaction waited on the first")
        .unwrap();
        assert_eq!(rows[0].get("one"), Some(&QueryValue::Integer(1)));

        adapter.rollback_transaction(second).await.unwrap();
        drop(busy);
        adapter.rollback_transaction(first).await.unwrap();
    }

    #[tokio::test]
    async fn test_statement_after_commit_is_unknown_transaction() {
        let adapter = create_test_adapter().await;
        let tx_id = adapter.begin_transaction().await.unwrap();
        adapter.commit_transaction(tx_id).await.unwrap();

        let options = BackendOptions {
            transaction: Some(tx_id),
            ..BackendOptions::default()
        };
        assert_eq!(
            adapter.fetch_all(&Query::new("test"), &options).await.unwrap_err(),
            BackendError::UnknownTransaction(tx_id.0)
        );
        assert_eq!(
            adapter
                .delete(&Query::new("test"), &options)
                .await
                .unwrap_err(),
            BackendError::UnknownTransaction(tx_id.0)
        );
    }
}
