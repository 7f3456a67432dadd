//! In-Memory Persistence Backend
//!
//! Keeps tables as vectors of rows behind a single lock. Intended for tests
//! and for hosts that want repository semantics without a database.
//!
//! ## Features
//!
//! - Auto-increment integer ids when the id column is missing or null
//! - Unique id enforcement
//! - Optional required columns, reported as constraint violations
//! - Transactions: `begin` copies every table so the transaction reads its
//!   own writes, `commit` replays the transaction's writes onto the current
//!   tables, `rollback` discards them
//!
//! Id sequences are shared by all transactions and are not rolled back, so
//! rows inserted inside and outside a transaction never collide on a
//! generated id.

use async_trait::async_trait;
use backend_traits::database::{
    validate_identifier, BackendOptions, PersistenceBackend, QueryRow, QueryValue, TransactionId,
};
use backend_traits::error::{BackendError, Result};
use backend_traits::query::Query;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

type Tables = HashMap<String, Vec<QueryRow>>;

/// A write made inside a transaction, replayed on commit
#[derive(Debug, Clone)]
enum Write {
    Insert { query: Query, row: QueryRow },
    Update { query: Query, values: QueryRow },
    Delete { query: Query },
}

#[derive(Debug, Default)]
struct OpenTransaction {
    tables: Tables,
    writes: Vec<Write>,
}

#[derive(Debug, Default)]
struct State {
    committed: Tables,
    transactions: HashMap<u64, OpenTransaction>,
    sequences: HashMap<String, i64>,
    required: HashMap<String, Vec<String>>,
}

impl State {
    fn tables(&self, options: &BackendOptions) -> Result<&Tables> {
        match options.transaction {
            Some(TransactionId(id)) => self
                .transactions
                .get(&id)
                .map(|tx| &tx.tables)
                .ok_or(BackendError::UnknownTransaction(id)),
            None => Ok(&self.committed),
        }
    }

    /// Apply `write` to the tables the options select, recording it when it
    /// runs inside a transaction
    fn apply(&mut self, write: Write, options: &BackendOptions) -> Result<Applied> {
        let required = self.required.get(write.table());
        match options.transaction {
            Some(TransactionId(id)) => {
                let tx = self
                    .transactions
                    .get_mut(&id)
                    .ok_or(BackendError::UnknownTransaction(id))?;
                let applied = apply_write(&mut tx.tables, &mut self.sequences, required, &write)?;
                tx.writes.push(applied.recorded(write));
                Ok(applied)
            }
            None => apply_write(&mut self.committed, &mut self.sequences, required, &write),
        }
    }
}

impl Write {
    fn table(&self) -> &str {
        match self {
            Write::Insert { query, .. } | Write::Update { query, .. } | Write::Delete { query } => {
                &query.table
            }
        }
    }
}

/// Outcome of one write
enum Applied {
    Inserted(QueryRow),
    Affected(u64),
}

impl Applied {
    /// The write to replay on commit; inserts replay with their assigned id
    fn recorded(&self, write: Write) -> Write {
        match (self, write) {
            (Applied::Inserted(row), Write::Insert { query, .. }) => Write::Insert {
                query,
                row: row.clone(),
            },
            (_, write) => write,
        }
    }
}

fn check_required(required: Option<&Vec<String>>, table: &str, row: &QueryRow) -> Result<()> {
    for column in required.into_iter().flatten() {
        if row.get(column).map_or(true, QueryValue::is_null) {
            return Err(BackendError::ConstraintViolation(format!(
                "NOT NULL constraint failed: {}.{}",
                table, column
            )));
        }
    }
    Ok(())
}

fn apply_write(
    tables: &mut Tables,
    sequences: &mut HashMap<String, i64>,
    required: Option<&Vec<String>>,
    write: &Write,
) -> Result<Applied> {
    match write {
        Write::Insert { query, row } => {
            insert_row(tables, sequences, required, query, row).map(Applied::Inserted)
        }
        Write::Update { query, values } => {
            update_rows(tables, required, query, values).map(Applied::Affected)
        }
        Write::Delete { query } => Ok(Applied::Affected(delete_rows(tables, query))),
    }
}

fn insert_row(
    tables: &mut Tables,
    sequences: &mut HashMap<String, i64>,
    required: Option<&Vec<String>>,
    query: &Query,
    values: &QueryRow,
) -> Result<QueryRow> {
    let sequence = sequences.entry(query.table.clone()).or_default();
    let mut row = values.clone();
    let id = match row.get(&query.id_column) {
        Some(value) if !value.is_null() => value.clone(),
        _ => {
            let id = QueryValue::Integer(*sequence + 1);
            row.insert(query.id_column.clone(), id.clone());
            id
        }
    };

    check_required(required, &query.table, &row)?;

    let rows = tables.entry(query.table.clone()).or_default();
    let duplicate = rows.iter().any(|existing| {
        existing
            .get(&query.id_column)
            .is_some_and(|value| value.matches_value(&id))
    });
    if duplicate {
        return Err(BackendError::ConstraintViolation(format!(
            "UNIQUE constraint failed: {}.{}",
            query.table, query.id_column
        )));
    }

    if let Some(assigned) = id.as_i64() {
        *sequence = (*sequence).max(assigned);
    }
    rows.push(row.clone());
    Ok(row)
}

fn update_rows(
    tables: &mut Tables,
    required: Option<&Vec<String>>,
    query: &Query,
    values: &QueryRow,
) -> Result<u64> {
    let Some(rows) = tables.get_mut(&query.table) else {
        return Ok(0);
    };

    let mut patched: Vec<(usize, QueryRow)> = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        if query.criteria.matches(row) {
            let mut next = row.clone();
            next.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
            check_required(required, &query.table, &next)?;
            patched.push((index, next));
        }
    }

    let affected = patched.len() as u64;
    for (index, row) in patched {
        rows[index] = row;
    }
    Ok(affected)
}

fn delete_rows(tables: &mut Tables, query: &Query) -> u64 {
    match tables.get_mut(&query.table) {
        Some(rows) => {
            let before = rows.len();
            rows.retain(|row| !query.criteria.matches(row));
            (before - rows.len()) as u64
        }
        None => 0,
    }
}

/// In-process implementation of [`PersistenceBackend`]
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    transaction_counter: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject inserts and updates that leave any of `columns` null
    pub async fn require_columns<I, S>(&self, table: &str, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        state
            .required
            .entry(table.to_string())
            .or_default()
            .extend(columns.into_iter().map(Into::into));
    }

    /// Committed rows of `table`, in insertion order
    pub async fn rows(&self, table: &str) -> Vec<QueryRow> {
        let state = self.state.lock().await;
        state.committed.get(table).cloned().unwrap_or_default()
    }

    fn log_call(call: &str, query: &Query, options: &BackendOptions) {
        if options.debug {
            info!(
                call,
                table = %query.table,
                criteria = ?query.criteria,
                require = options.require,
                transaction = ?options.transaction,
                "Memory backend call"
            );
        } else {
            debug!(
                call,
                table = %query.table,
                constraints = query.criteria.len(),
                transaction = ?options.transaction,
                "Memory backend call"
            );
        }
    }

    fn validate(query: &Query, values: Option<&QueryRow>) -> Result<()> {
        validate_identifier(&query.table)?;
        validate_identifier(&query.id_column)?;
        for (column, _) in query.criteria.iter() {
            validate_identifier(column)?;
        }
        if let Some(values) = values {
            for column in values.keys() {
                validate_identifier(column)?;
            }
        }
        Ok(())
    }

    async fn write(&self, write: Write, options: &BackendOptions) -> Result<Applied> {
        let mut state = self.state.lock().await;
        state.apply(write, options)
    }
}

#[async_trait]
impl PersistenceBackend for MemoryBackend {
    async fn fetch_one(&self, query: &Query, options: &BackendOptions) -> Result<Option<QueryRow>> {
        Self::log_call("fetch_one", query, options);
        Self::validate(query, None)?;

        let state = self.state.lock().await;
        let row = state
            .tables(options)?
            .get(&query.table)
            .and_then(|rows| rows.iter().find(|row| query.criteria.matches(row)))
            .cloned();

        match row {
            None if options.require => Err(BackendError::EmptyResponse),
            row => Ok(row),
        }
    }

    async fn fetch_all(&self, query: &Query, options: &BackendOptions) -> Result<Vec<QueryRow>> {
        Self::log_call("fetch_all", query, options);
        Self::validate(query, None)?;

        let state = self.state.lock().await;
        let rows: Vec<QueryRow> = state
            .tables(options)?
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.criteria.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

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
        Self::log_call("insert", query, options);
        Self::validate(query, Some(values))?;

        let write = Write::Insert {
            query: query.clone(),
            row: values.clone(),
        };
        match self.write(write, options).await? {
            Applied::Inserted(row) => Ok(row),
            Applied::Affected(_) => Err(BackendError::EmptyResponse),
        }
    }

    async fn update(
        &self,
        query: &Query,
        values: &QueryRow,
        options: &BackendOptions,
    ) -> Result<u64> {
        Self::log_call("update", query, options);
        Self::validate(query, Some(values))?;

        let write = Write::Update {
            query: query.clone(),
            values: values.clone(),
        };
        let affected = match self.write(write, options).await? {
            Applied::Affected(affected) => affected,
            Applied::Inserted(_) => 1,
        };

        if affected == 0 && options.require {
            return Err(BackendError::NoRowsUpdated);
        }
        Ok(affected)
    }

    async fn delete(&self, query: &Query, options: &BackendOptions) -> Result<u64> {
        Self::log_call("delete", query, options);
        Self::validate(query, None)?;

        let write = Write::Delete {
            query: query.clone(),
        };
        let affected = match self.write(write, options).await? {
            Applied::Affected(affected) => affected,
            Applied::Inserted(_) => 1,
        };

        if affected == 0 && options.require {
            return Err(BackendError::NoRowsDeleted);
        }
        Ok(affected)
    }

    async fn begin_transaction(&self) -> Result<TransactionId> {
        let id = self.transaction_counter.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        let tables = state.committed.clone();
        state.transactions.insert(
            id,
            OpenTransaction {
                tables,
                writes: Vec::new(),
            },
        );

        debug!(transaction_id = id, "Beginning memory transaction");
        Ok(TransactionId(id))
    }

    /// Replay the transaction's writes onto the current tables
    ///
    /// Writes made outside the transaction since `begin` are kept. If a
    /// replayed write conflicts (for example a duplicate explicit id), the
    /// commit fails with that error and nothing is published.
    async fn commit_transaction(&self, transaction_id: TransactionId) -> Result<()> {
        debug!(transaction_id = transaction_id.0, "Committing memory transaction");

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let tx = state
            .transactions
            .remove(&transaction_id.0)
            .ok_or(BackendError::UnknownTransaction(transaction_id.0))?;

        let mut tables = state.committed.clone();
        for write in &tx.writes {
            let required = state.required.get(write.table());
            apply_write(&mut tables, &mut state.sequences, required, write)?;
        }
        state.committed = tables;
        Ok(())
    }

    async fn rollback_transaction(&self, transaction_id: TransactionId) -> Result<()> {
        debug!(
            transaction_id = transaction_id.0,
            "Rolling back memory transaction"
        );

        let mut state = self.state.lock().await;
        state
            .transactions
            .remove(&transaction_id.0)
            .map(|_| ())
            .ok_or(BackendError::UnknownTransaction(transaction_id.0))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
