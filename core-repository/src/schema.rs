//! Entity schema: how one entity type maps onto a backend table.

use backend_traits::Relation;
use core_runtime::config::{EntityConventions, NamingConvention};

use crate::naming;

/// How an entity type is removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionStrategy {
    /// Flip a boolean flag field to `true`; the row stays in the table
    Soft { flag: String },
    /// Destroy the row
    Hard,
}

impl DeletionStrategy {
    pub fn flag(&self) -> Option<&str> {
        match self {
            DeletionStrategy::Soft { flag } => Some(flag.as_str()),
            DeletionStrategy::Hard => None,
        }
    }
}

/// Who assigns identifiers to new entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdGeneration {
    /// The backend assigns the id (auto-increment)
    #[default]
    Backend,
    /// The repository assigns a random UUID v4 when the caller gives none
    Uuid,
}

/// Timestamp fields maintained by the repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamps {
    pub created: String,
    pub updated: String,
}

/// Description of one entity type
///
/// Field names are caller-facing names; [`EntitySchema::column`] converts
/// them with the schema's naming convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    entity: String,
    table: String,
    id_field: String,
    timestamps: Option<Timestamps>,
    deletion: DeletionStrategy,
    boolean_fields: Vec<String>,
    relations: Vec<Relation>,
    related_schemas: Vec<(String, EntitySchema)>,
    id_generation: IdGeneration,
    naming: NamingConvention,
}

impl EntitySchema {
    /// Schema for `entity` stored in `table` with the default conventions:
    /// id field `id`, timestamps `createdDate`/`lastUpdatedDate`, soft
    /// deletion through `isDeleted` and snake_case columns.
    pub fn new(entity: impl Into<String>, table: impl Into<String>) -> Self {
        Self::with_conventions(entity, table, &EntityConventions::default())
    }

    /// Schema seeded from configured conventions
    pub fn with_conventions(
        entity: impl Into<String>,
        table: impl Into<String>,
        conventions: &EntityConventions,
    ) -> Self {
        let timestamps = match (&conventions.created_field, &conventions.updated_field) {
            (Some(created), Some(updated)) => Some(Timestamps {
                created: created.clone(),
                updated: updated.clone(),
            }),
            _ => None,
        };
        let deletion = match &conventions.delete_flag {
            Some(flag) => DeletionStrategy::Soft { flag: flag.clone() },
            None => DeletionStrategy::Hard,
        };

        Self {
            entity: entity.into(),
            table: table.into(),
            id_field: conventions.id_field.clone(),
            timestamps,
            deletion,
            boolean_fields: Vec::new(),
            relations: Vec::new(),
            related_schemas: Vec::new(),
            id_generation: IdGeneration::Backend,
            naming: conventions.naming,
        }
    }

    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn timestamps(mut self, created: impl Into<String>, updated: impl Into<String>) -> Self {
        self.timestamps = Some(Timestamps {
            created: created.into(),
            updated: updated.into(),
        });
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = None;
        self
    }

    /// Retire entities by setting `flag` to `true`
    pub fn soft_delete(mut self, flag: impl Into<String>) -> Self {
        self.deletion = DeletionStrategy::Soft { flag: flag.into() };
        self
    }

    /// Destroy rows on removal
    pub fn hard_delete(mut self) -> Self {
        self.deletion = DeletionStrategy::Hard;
        self
    }

    /// Declare a field whose stored 0/1 values read back as booleans
    pub fn boolean_field(mut self, field: impl Into<String>) -> Self {
        self.boolean_fields.push(field.into());
        self
    }

    /// Declare a relation that can be eager-loaded by name
    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Describe the rows loaded for relation `name`
    ///
    /// Without one, related rows are read with this schema's naming and
    /// boolean rules and are never filtered. With one, they use the related
    /// schema's rules and its soft-deleted rows are hidden unless the call
    /// includes removed entities.
    pub fn related_schema(mut self, name: impl Into<String>, schema: EntitySchema) -> Self {
        let name = name.into();
        self.related_schemas.retain(|(existing, _)| *existing != name);
        self.related_schemas.push((name, schema));
        self
    }

    pub fn id_generation(mut self, generation: IdGeneration) -> Self {
        self.id_generation = generation;
        self
    }

    pub fn naming(mut self, naming: NamingConvention) -> Self {
        self.naming = naming;
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id(&self) -> &str {
        &self.id_field
    }

    pub fn timestamp_fields(&self) -> Option<&Timestamps> {
        self.timestamps.as_ref()
    }

    pub fn deletion(&self) -> &DeletionStrategy {
        &self.deletion
    }

    pub fn generation(&self) -> IdGeneration {
        self.id_generation
    }

    pub fn naming_convention(&self) -> NamingConvention {
        self.naming
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn find_relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    /// Schema declared for the rows of relation `name`
    pub fn schema_for_relation(&self, name: &str) -> Option<&EntitySchema> {
        self.related_schemas
            .iter()
            .find(|(relation, _)| relation == name)
            .map(|(_, schema)| schema)
    }

    /// Whether `field` holds booleans; the delete flag always does
    pub fn is_boolean(&self, field: &str) -> bool {
        self.deletion.flag() == Some(field) || self.boolean_fields.iter().any(|f| f == field)
    }

    /// Backend column for a field
    pub fn column(&self, field: &str) -> String {
        naming::column_name(self.naming, field)
    }

    /// Field for a backend column
    ///
    /// Columns of declared fields (id, timestamps, delete flag, boolean
    /// fields) map back to the declared name as written, so a field declared
    /// in snake_case reads back under the same key. Other columns follow the
    /// naming convention.
    pub fn field(&self, column: &str) -> String {
        self.declared_fields()
            .find(|field| self.column(field) == column)
            .map(str::to_string)
            .unwrap_or_else(|| naming::field_name(self.naming, column))
    }

    fn declared_fields(&self) -> impl Iterator<Item = &str> {
        let timestamps = self
            .timestamps
            .iter()
            .flat_map(|t| [t.created.as_str(), t.updated.as_str()]);
        std::iter::once(self.id_field.as_str())
            .chain(timestamps)
            .chain(self.deletion.flag())
            .chain(self.boolean_fields.iter().map(String::as_str))
    }

    pub fn id_column(&self) -> String {
        self.column(&self.id_field)
    }
}
