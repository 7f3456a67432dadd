//! Soft-delete-aware repository.
//!
//! Every terminal operation follows the same shape:
//! configure, build the predicate, execute, normalize errors.
//!
//! ```ignore
//! use core_repository::{EntitySchema, Repository};
//! use serde_json::json;
//!
//! let repo = Repository::new(backend, EntitySchema::new("Test", "test_table"));
//! let created = repo.insert(json!({"name": "Marvel"}).as_object().cloned().unwrap()).await?;
//! let visible = repo.find_all().await?;
//! let everything = repo.include_removed(true).find_all().await?;
//! ```

use std::sync::Arc;

use backend_traits::{
    BackendError, Clock, Criteria, PersistenceBackend, Query, QueryRow, QueryValue, Relation,
    SystemClock, TransactionId,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{normalize, RepositoryError, RepositoryOperation, Result};
use crate::options::CallOptions;
use crate::predicate;
use crate::record::{self, Record};
use crate::relations;
use crate::schema::{DeletionStrategy, EntitySchema, IdGeneration};

/// Generic repository for one entity type
///
/// A single instance is meant to be shared by concurrent callers. It holds no
/// per-call state: options live in the [`ScopedRepository`] returned by the
/// fluent setters and are consumed by exactly one terminal operation.
#[derive(Clone)]
pub struct Repository {
    backend: Arc<dyn PersistenceBackend>,
    schema: Arc<EntitySchema>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("schema", &self.schema)
            .field("backend", &"PersistenceBackend { ... }")
            .field("clock", &"Clock { ... }")
            .finish()
    }
}

impl Repository {
    pub fn new(backend: Arc<dyn PersistenceBackend>, schema: EntitySchema) -> Self {
        Self {
            backend,
            schema: Arc::new(schema),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for timestamp bookkeeping
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Start a call with explicit options
    pub fn with_options(&self, options: CallOptions) -> ScopedRepository<'_> {
        ScopedRepository {
            repo: self,
            options,
        }
    }

    fn scoped(&self) -> ScopedRepository<'_> {
        self.with_options(CallOptions::default())
    }

    pub fn with_transaction(&self, transaction: TransactionId) -> ScopedRepository<'_> {
        self.scoped().with_transaction(transaction)
    }

    pub fn with_related<I, S>(&self, names: I) -> ScopedRepository<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scoped().with_related(names)
    }

    pub fn require(&self, require: bool) -> ScopedRepository<'_> {
        self.scoped().require(require)
    }

    pub fn debug(&self, debug: bool) -> ScopedRepository<'_> {
        self.scoped().debug(debug)
    }

    pub fn include_removed(&self, include: bool) -> ScopedRepository<'_> {
        self.scoped().include_removed(include)
    }

    pub async fn insert(&self, record: Record) -> Result<Record> {
        self.scoped().insert(record).await
    }

    pub async fn find_all(&self) -> Result<Vec<Record>> {
        self.scoped().find_all().await
    }

    pub async fn find_by_id(&self, id: impl Into<QueryValue>) -> Result<Record> {
        self.scoped().find_by_id(id).await
    }

    pub async fn find_by_criteria(&self, criteria: Record) -> Result<Vec<Record>> {
        self.scoped().find_by_criteria(criteria).await
    }

    pub async fn find_one_by_criteria(&self, criteria: Record) -> Result<Record> {
        self.scoped().find_one_by_criteria(criteria).await
    }

    pub async fn update_by_id(&self, id: impl Into<QueryValue>, data: Record) -> Result<Record> {
        self.scoped().update_by_id(id, data).await
    }

    pub async fn update(&self, record: Record) -> Result<Record> {
        self.scoped().update(record).await
    }

    pub async fn remove_by_id(&self, id: impl Into<QueryValue>) -> Result<Record> {
        self.scoped().remove_by_id(id).await
    }

    /// Begin a backend transaction to pass to [`Repository::with_transaction`]
    pub async fn begin_transaction(&self) -> Result<TransactionId> {
        let transaction = self
            .backend
            .begin_transaction()
            .await
            .map_err(|e| self.fail(RepositoryOperation::Transaction, false, e))?;
        debug!(entity = %self.schema.entity(), %transaction, "Transaction started");
        Ok(transaction)
    }

    pub async fn commit_transaction(&self, transaction: TransactionId) -> Result<()> {
        self.backend
            .commit_transaction(transaction)
            .await
            .map_err(|e| self.fail(RepositoryOperation::Transaction, false, e))?;
        debug!(entity = %self.schema.entity(), %transaction, "Transaction committed");
        Ok(())
    }

    pub async fn rollback_transaction(&self, transaction: TransactionId) -> Result<()> {
        self.backend
            .rollback_transaction(transaction)
            .await
            .map_err(|e| self.fail(RepositoryOperation::Transaction, false, e))?;
        debug!(entity = %self.schema.entity(), %transaction, "Transaction rolled back");
        Ok(())
    }

    fn fail(
        &self,
        operation: RepositoryOperation,
        verbose: bool,
        error: BackendError,
    ) -> RepositoryError {
        let error = normalize(self.schema.entity(), operation, error);
        warn!(
            entity = %self.schema.entity(),
            operation = %operation,
            kind = %error.kind(),
            verbose,
            error = %error.cause(),
            "Repository operation failed"
        );
        error
    }

    fn query(&self, criteria: Criteria) -> Query {
        Query::new(self.schema.table())
            .id_column(self.schema.id_column())
            .filter(criteria)
    }
}

/// A repository call with its options
///
/// Setters consume and return the handle; terminal operations consume it, so
/// options cannot outlive the call they were built for.
#[derive(Debug)]
#[must_use = "options do nothing until a terminal operation is called"]
pub struct ScopedRepository<'a> {
    repo: &'a Repository,
    options: CallOptions,
}

impl<'a> ScopedRepository<'a> {
    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    pub fn with_transaction(mut self, transaction: TransactionId) -> Self {
        self.options = self.options.with_transaction(transaction);
        self
    }

    /// Append relations to eager-load
    pub fn with_related<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = self.options.with_related(names);
        self
    }

    /// Replace the relations to eager-load
    pub fn replace_related<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = self.options.replace_related(names);
        self
    }

    pub fn require(mut self, require: bool) -> Self {
        self.options = self.options.require(require);
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.options = self.options.debug(debug);
        self
    }

    pub fn include_removed(mut self, include: bool) -> Self {
        self.options = self.options.include_removed(include);
        self
    }

    /// Persist a new entity and return it as stored
    ///
    /// Missing timestamps are filled from the clock, a missing delete flag
    /// defaults to `false` and, for UUID schemas, a missing id is generated.
    /// Caller-supplied values are never overwritten.
    pub async fn insert(self, record: Record) -> Result<Record> {
        let operation = RepositoryOperation::Insert;
        self.trace(operation);
        self.run_insert(record)
            .await
            .map_err(|e| self.repo.fail(operation, self.options.debug, e))
    }

    /// Every visible entity
    ///
    /// With `require`, an empty result is `NotFound`.
    pub async fn find_all(self) -> Result<Vec<Record>> {
        let operation = RepositoryOperation::FindAll;
        self.trace(operation);
        let criteria = predicate::soft_delete_fragment(self.schema(), self.options.include_removed);
        self.run_find_many(criteria)
            .await
            .map_err(|e| self.repo.fail(operation, self.options.debug, e))
    }

    /// The visible entity with `id`; zero matches is always `NotFound`
    pub async fn find_by_id(self, id: impl Into<QueryValue>) -> Result<Record> {
        let operation = RepositoryOperation::FindById;
        self.trace(operation);
        let criteria = predicate::by_id(self.schema(), id.into(), self.options.include_removed);
        self.run_find_one(criteria)
            .await
            .map_err(|e| self.repo.fail(operation, self.options.debug, e))
    }

    /// Visible entities whose fields equal `criteria`
    ///
    /// With `require`, an empty result is `NotFound`.
    pub async fn find_by_criteria(self, criteria: Record) -> Result<Vec<Record>> {
        let operation = RepositoryOperation::FindByCriteria;
        self.trace(operation);
        let result = match self.criteria(&criteria) {
            Ok(criteria) => self.run_find_many(criteria).await,
            Err(e) => Err(e),
        };
        result.map_err(|e| self.repo.fail(operation, self.options.debug, e))
    }

    /// First visible entity whose fields equal `criteria`; zero matches is
    /// always `NotFound`
    pub async fn find_one_by_criteria(self, criteria: Record) -> Result<Record> {
        let operation = RepositoryOperation::FindOneByCriteria;
        self.trace(operation);
        let result = match self.criteria(&criteria) {
            Ok(criteria) => self.run_find_one(criteria).await,
            Err(e) => Err(e),
        };
        result.map_err(|e| self.repo.fail(operation, self.options.debug, e))
    }

    /// Patch the visible entity with `id`
    ///
    /// The entity is fetched first, so a missing or removed entity is
    /// `NotFound`; a patch that then affects no rows is `NotUpdated`. The id
    /// field is never patched. Returns the entity with the patch applied.
    pub async fn update_by_id(self, id: impl Into<QueryValue>, data: Record) -> Result<Record> {
        let operation = RepositoryOperation::UpdateById;
        self.trace(operation);
        self.run_update(id.into(), data)
            .await
            .map_err(|e| self.repo.fail(operation, self.options.debug, e))
    }

    /// [`ScopedRepository::update_by_id`] for a record that carries its own id
    pub async fn update(self, mut record: Record) -> Result<Record> {
        let operation = RepositoryOperation::UpdateById;
        let id_field = self.schema().id().to_string();
        let id = match record.remove(&id_field) {
            Some(value) if !value.is_null() => value,
            _ => {
                return Err(self.repo.fail(
                    operation,
                    self.options.debug,
                    BackendError::InvalidValue {
                        field: id_field,
                        message: "record has no id to update".to_string(),
                    },
                ))
            }
        };
        let id = record::to_query_value(&id_field, &id)
            .map_err(|e| self.repo.fail(operation, self.options.debug, e))?;
        self.update_by_id(id, record).await
    }

    /// Retire (soft) or destroy (hard) the entity with `id`
    ///
    /// Soft removal fetches the visible entity (`NotFound` when missing) and
    /// sets its flag; a flag patch affecting no rows is `NotRemoved`. Hard
    /// removal targets the id alone and is `NotRemoved` when nothing was
    /// destroyed. Returns the patched entity (soft) or the entity as it was
    /// before removal (hard).
    pub async fn remove_by_id(self, id: impl Into<QueryValue>) -> Result<Record> {
        let operation = RepositoryOperation::RemoveById;
        self.trace(operation);
        let id = id.into();
        let result = match self.schema().deletion().clone() {
            DeletionStrategy::Soft { flag } => self.run_soft_remove(id, &flag).await,
            DeletionStrategy::Hard => self.run_hard_remove(id).await,
        };
        result.map_err(|e| self.repo.fail(operation, self.options.debug, e))
    }

    fn schema(&self) -> &EntitySchema {
        &self.repo.schema
    }

    fn backend(&self) -> &dyn PersistenceBackend {
        self.repo.backend.as_ref()
    }

    fn trace(&self, operation: RepositoryOperation) {
        if self.options.debug {
            info!(
                entity = %self.schema().entity(),
                table = %self.schema().table(),
                operation = %operation,
                options = ?self.options,
                "Repository call"
            );
        } else {
            debug!(
                entity = %self.schema().entity(),
                operation = %operation,
                require = self.options.require,
                include_removed = self.options.include_removed,
                "Repository call"
            );
        }
    }

    fn related(&self) -> std::result::Result<Vec<&'a Relation>, BackendError> {
        let repo: &'a Repository = self.repo;
        relations::resolve(&repo.schema, &self.options.related)
    }

    /// Caller criteria as columns, plus the soft-delete fragment
    fn criteria(&self, criteria: &Record) -> std::result::Result<Criteria, BackendError> {
        let mut criteria = record::to_criteria(self.schema(), criteria)?;
        predicate::apply_soft_delete(&mut criteria, self.schema(), self.options.include_removed);
        Ok(criteria)
    }

    /// Convert a row into a record and nest requested relations
    async fn finish(
        &self,
        relations: &[&Relation],
        row: QueryRow,
    ) -> std::result::Result<Record, BackendError> {
        let mut record = record::from_row(self.schema(), row.clone());
        if !relations.is_empty() {
            relations::attach(
                self.backend(),
                self.schema(),
                relations,
                &row,
                &mut record,
                &self.options.backend(false),
                self.options.include_removed,
            )
            .await?;
        }
        Ok(record)
    }

    async fn run_find_many(
        &self,
        criteria: Criteria,
    ) -> std::result::Result<Vec<Record>, BackendError> {
        let relations = self.related()?;
        let rows = self
            .backend()
            .fetch_all(&self.repo.query(criteria), &self.options.backend(self.options.require))
            .await?;
        if self.options.require && rows.is_empty() {
            return Err(BackendError::EmptyResponse);
        }

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.finish(&relations, row).await?);
        }
        Ok(records)
    }

    async fn run_find_one(
        &self,
        criteria: Criteria,
    ) -> std::result::Result<Record, BackendError> {
        let relations = self.related()?;
        let row = self.fetch_required(criteria).await?;
        self.finish(&relations, row).await
    }

    async fn fetch_required(
        &self,
        criteria: Criteria,
    ) -> std::result::Result<QueryRow, BackendError> {
        self.backend()
            .fetch_one(&self.repo.query(criteria), &self.options.backend(true))
            .await?
            .ok_or(BackendError::EmptyResponse)
    }

    async fn run_insert(&self, mut data: Record) -> std::result::Result<Record, BackendError> {
        let relations = self.related()?;
        let schema = self.schema();

        if let Some(timestamps) = schema.timestamp_fields() {
            let now = Value::String(self.repo.clock.timestamp_string());
            fill_missing(&mut data, &timestamps.created, now.clone());
            fill_missing(&mut data, &timestamps.updated, now);
        }
        if let Some(flag) = schema.deletion().flag() {
            fill_missing(&mut data, flag, Value::Bool(false));
        }
        if schema.generation() == IdGeneration::Uuid
            && data.get(schema.id()).map_or(true, Value::is_null)
        {
            data.insert(
                schema.id().to_string(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
        }

        let row = record::to_row(schema, &data)?;
        let stored = self
            .backend()
            .insert(
                &self.repo.query(Criteria::new()),
                &row,
                &self.options.backend(true),
            )
            .await?;
        self.finish(&relations, stored).await
    }

    async fn run_update(
        &self,
        id: QueryValue,
        mut data: Record,
    ) -> std::result::Result<Record, BackendError> {
        let relations = self.related()?;
        let schema = self.schema();
        let criteria = predicate::by_id(schema, id, self.options.include_removed);

        let existing = self.fetch_required(criteria.clone()).await?;

        data.remove(schema.id());
        if data.is_empty() {
            return self.finish(&relations, existing).await;
        }
        if let Some(timestamps) = schema.timestamp_fields() {
            let now = Value::String(self.repo.clock.timestamp_string());
            fill_missing(&mut data, &timestamps.updated, now);
        }

        let patch = record::to_row(schema, &data)?;
        self.backend()
            .update(&self.repo.query(criteria), &patch, &self.options.backend(true))
            .await?;

        self.finish(&relations, merge(existing, patch)).await
    }

    async fn run_soft_remove(
        &self,
        id: QueryValue,
        flag: &str,
    ) -> std::result::Result<Record, BackendError> {
        let relations = self.related()?;
        let schema = self.schema();
        let criteria = predicate::by_id(schema, id, self.options.include_removed);

        let existing = self.fetch_required(criteria.clone()).await?;

        let mut patch = QueryRow::new();
        patch.insert(schema.column(flag), QueryValue::Boolean(true));
        if let Some(timestamps) = schema.timestamp_fields() {
            patch.insert(
                schema.column(&timestamps.updated),
                QueryValue::Text(self.repo.clock.timestamp_string()),
            );
        }

        self.backend()
            .update(&self.repo.query(criteria), &patch, &self.options.backend(true))
            .await?;

        self.finish(&relations, merge(existing, patch)).await
    }

    async fn run_hard_remove(&self, id: QueryValue) -> std::result::Result<Record, BackendError> {
        let relations = self.related()?;
        let schema = self.schema();
        let criteria = Criteria::new().with(schema.id_column(), id.clone());

        let existing = self
            .backend()
            .fetch_one(&self.repo.query(criteria.clone()), &self.options.backend(false))
            .await?;
        let removed = match existing {
            Some(row) => self.finish(&relations, row).await?,
            None => {
                let mut record = Record::new();
                record.insert(
                    schema.id().to_string(),
                    record::to_json_value(id, false),
                );
                record
            }
        };

        self.backend()
            .delete(&self.repo.query(criteria), &self.options.backend(true))
            .await?;

        Ok(removed)
    }
}

fn fill_missing(data: &mut Record, field: &str, value: Value) {
    data.entry(field.to_string()).or_insert(value);
}

fn merge(mut base: QueryRow, patch: QueryRow) -> QueryRow {
    base.extend(patch);
    base
}
