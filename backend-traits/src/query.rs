//! Query Construction
//!
//! Criteria and query values handed from the repository layer to a
//! [`PersistenceBackend`](crate::database::PersistenceBackend). Column names
//! in here are already in the backend's naming convention; converting from
//! caller-facing field names is the repository's job.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::database::{QueryRow, QueryValue};

/// Equality constraints keyed by column name.
///
/// Iteration order is the column name order, which keeps generated SQL stable
/// for a given set of constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    constraints: BTreeMap<String, QueryValue>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constraint, replacing any existing value for the column
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<QueryValue>) {
        self.constraints.insert(column.into(), value.into());
    }

    /// Chainable form of [`Criteria::insert`]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.insert(column, value);
        self
    }

    /// Add a constraint only when the column is not constrained yet.
    ///
    /// Returns `true` when the constraint was added.
    pub fn insert_if_absent(
        &mut self,
        column: impl Into<String>,
        value: impl Into<QueryValue>,
    ) -> bool {
        let column = column.into();
        if self.constraints.contains_key(&column) {
            return false;
        }
        self.constraints.insert(column, value.into());
        true
    }

    /// Merge another set of constraints without overwriting existing columns
    pub fn merge_missing(&mut self, other: Criteria) {
        for (column, value) in other.constraints {
            self.constraints.entry(column).or_insert(value);
        }
    }

    pub fn get(&self, column: &str) -> Option<&QueryValue> {
        self.constraints.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.constraints.contains_key(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &QueryValue)> {
        self.constraints.iter()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Check whether a row satisfies every constraint (SQL equality semantics)
    pub fn matches(&self, row: &QueryRow) -> bool {
        self.constraints.iter().all(|(column, expected)| {
            row.get(column)
                .map(|actual| actual.matches_value(expected))
                .unwrap_or(false)
        })
    }
}

impl<K, V> FromIterator<(K, V)> for Criteria
where
    K: Into<String>,
    V: Into<QueryValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut criteria = Criteria::new();
        for (column, value) in iter {
            criteria.insert(column, value);
        }
        criteria
    }
}

/// A filtered query against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Table name
    pub table: String,
    /// Primary key column, used when the backend generates identifiers
    pub id_column: String,
    /// Equality constraints every matching row must satisfy
    pub criteria: Criteria,
}

impl Query {
    /// Query every row of `table`
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: "id".to_string(),
            criteria: Criteria::new(),
        }
    }

    /// Set the primary key column
    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    /// Restrict the query to rows matching `criteria`
    pub fn filter(mut self, criteria: Criteria) -> Self {
        self.criteria = criteria;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_if_absent_keeps_existing_value() {
        let mut criteria = Criteria::new().with("is_deleted", true);
        assert!(!criteria.insert_if_absent("is_deleted", false));
        assert_eq!(criteria.get("is_deleted"), Some(&QueryValue::Boolean(true)));

        assert!(criteria.insert_if_absent("name", "Marvel"));
        assert_eq!(criteria.len(), 2);
    }

    #[test]
    fn test_merge_missing_does_not_overwrite() {
        let mut criteria = Criteria::new().with("id", 1_i64);
        criteria.merge_missing(Criteria::new().with("id", 2_i64).with("is_deleted", false));

        assert_eq!(criteria.get("id"), Some(&QueryValue::Integer(1)));
        assert_eq!(criteria.get("is_deleted"), Some(&QueryValue::Boolean(false)));
    }

    #[test]
    fn test_matches_uses_sql_equality() {
        let mut row = QueryRow::new();
        row.insert("id".to_string(), QueryValue::Integer(7));
        row.insert("is_deleted".to_string(), QueryValue::Integer(0));

        assert!(Criteria::new().with("is_deleted", false).matches(&row));
        assert!(Criteria::new().with("id", 7.0_f64).matches(&row));
        assert!(!Criteria::new().with("id", 8_i64).matches(&row));
        assert!(!Criteria::new().with("missing", 1_i64).matches(&row));
        assert!(Criteria::new().matches(&row));
    }

    #[test]
    fn test_query_builder() {
        let query = Query::new("test_table")
            .id_column("uid")
            .filter(Criteria::new().with("name", "DC"));

        assert_eq!(query.table, "test_table");
        assert_eq!(query.id_column, "uid");
        assert_eq!(query.criteria.len(), 1);
    }
}
