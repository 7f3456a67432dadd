//! Eager loading of named relations.

use backend_traits::{
    BackendError, BackendOptions, PersistenceBackend, QueryRow, QueryValue, RelatedRows, Relation,
};
use serde_json::Value;

use crate::record::{from_row, Record};
use crate::schema::EntitySchema;

/// Resolve requested relation names against the schema
///
/// Duplicates are loaded once. An unknown name fails the whole call before
/// anything is fetched.
pub fn resolve<'a>(
    schema: &'a EntitySchema,
    names: &[String],
) -> Result<Vec<&'a Relation>, BackendError> {
    let mut resolved: Vec<&Relation> = Vec::with_capacity(names.len());
    for name in names {
        let relation = schema.find_relation(name).ok_or_else(|| {
            BackendError::InvalidQuery(format!(
                "{} has no relation named '{}'",
                schema.entity(),
                name
            ))
        })?;
        if !resolved.iter().any(|r| r.name == relation.name) {
            resolved.push(relation);
        }
    }
    Ok(resolved)
}

/// Load every relation for one parent row and nest it into `record`
///
/// Has-many relations nest an array; belongs-to relations nest an object or
/// `null`. Rows are read with the schema registered for the relation, or with
/// the parent's schema when none is. Soft-deleted related rows are dropped
/// unless `include_removed` is set, which needs a registered schema to know
/// the flag.
pub async fn attach(
    backend: &dyn PersistenceBackend,
    schema: &EntitySchema,
    relations: &[&Relation],
    parent: &QueryRow,
    record: &mut Record,
    options: &BackendOptions,
    include_removed: bool,
) -> Result<(), BackendError> {
    for relation in relations {
        let related = schema.schema_for_relation(&relation.name);
        let target = related.unwrap_or(schema);
        let removed_flag = match related {
            Some(related) if !include_removed => {
                related.deletion().flag().map(|flag| related.column(flag))
            }
            _ => None,
        };
        let visible = |row: &QueryRow| match &removed_flag {
            Some(column) => !is_flagged(row, column),
            None => true,
        };

        let value = match backend.fetch_related(relation, parent, options).await? {
            RelatedRows::Many(rows) => Value::Array(
                rows.into_iter()
                    .filter(|row| visible(row))
                    .map(|row| Value::Object(from_row(target, row)))
                    .collect(),
            ),
            RelatedRows::One(Some(row)) if visible(&row) => Value::Object(from_row(target, row)),
            RelatedRows::One(_) => Value::Null,
        };
        record.insert(relation.name.clone(), value);
    }
    Ok(())
}

fn is_flagged(row: &QueryRow, column: &str) -> bool {
    row.get(column)
        .is_some_and(|value| value.matches_value(&QueryValue::Boolean(true)))
}
