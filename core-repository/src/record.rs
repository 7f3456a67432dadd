//! Conversion between caller records and backend rows.
//!
//! Records are JSON objects keyed by field name. Rows are keyed by column
//! name. Only scalar values cross the boundary: arrays and objects in write
//! data are rejected with [`BackendError::InvalidValue`].

use backend_traits::{BackendError, Criteria, QueryRow, QueryValue};
use serde_json::{Map, Number, Value};

use crate::schema::EntitySchema;

/// A plain structured entity, keyed by field name
pub type Record = Map<String, Value>;

/// Convert one JSON scalar into a backend value
pub fn to_query_value(field: &str, value: &Value) -> Result<QueryValue, BackendError> {
    match value {
        Value::Null => Ok(QueryValue::Null),
        Value::Bool(b) => Ok(QueryValue::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(QueryValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(QueryValue::Real(f))
            } else {
                Err(BackendError::InvalidValue {
                    field: field.to_string(),
                    message: format!("number {} is out of range", n),
                })
            }
        }
        Value::String(s) => Ok(QueryValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => Err(BackendError::InvalidValue {
            field: field.to_string(),
            message: "nested arrays and objects cannot be stored".to_string(),
        }),
    }
}

/// Convert one backend value into JSON, reading 0/1 as booleans when asked
pub fn to_json_value(value: QueryValue, boolean: bool) -> Value {
    match value {
        QueryValue::Null => Value::Null,
        QueryValue::Integer(i) if boolean && (i == 0 || i == 1) => Value::Bool(i == 1),
        QueryValue::Integer(i) => Value::Number(i.into()),
        QueryValue::Real(r) => Number::from_f64(r).map(Value::Number).unwrap_or(Value::Null),
        QueryValue::Text(s) => Value::String(s),
        QueryValue::Boolean(b) => Value::Bool(b),
        QueryValue::Blob(bytes) => Value::Array(
            bytes
                .into_iter()
                .map(|b| Value::Number(Number::from(b)))
                .collect(),
        ),
    }
}

/// Convert a record into a row keyed by column name
pub fn to_row(schema: &EntitySchema, record: &Record) -> Result<QueryRow, BackendError> {
    let mut row = QueryRow::with_capacity(record.len());
    for (field, value) in record {
        row.insert(schema.column(field), to_query_value(field, value)?);
    }
    Ok(row)
}

/// Convert a row into a record keyed by field name
pub fn from_row(schema: &EntitySchema, row: QueryRow) -> Record {
    row.into_iter()
        .map(|(column, value)| {
            let field = schema.field(&column);
            let boolean = schema.is_boolean(&field);
            (field, to_json_value(value, boolean))
        })
        .collect()
}

/// Convert caller criteria (field names) into column criteria
pub fn to_criteria(schema: &EntitySchema, record: &Record) -> Result<Criteria, BackendError> {
    let mut criteria = Criteria::new();
    for (field, value) in record {
        criteria.insert(schema.column(field), to_query_value(field, value)?);
    }
    Ok(criteria)
}
