//! Soft-delete visibility filter.
//!
//! | Deletion | `include_removed` | Fragment |
//! |----------|-------------------|----------|
//! | hard | any | empty |
//! | soft | `false` | `{ flag: false }` |
//! | soft | `true` | empty (live and removed rows) |
//!
//! There is no way to ask for removed rows only.

use backend_traits::{Criteria, QueryValue};

use crate::schema::{DeletionStrategy, EntitySchema};

/// Column-level constraint that hides removed rows
pub fn soft_delete_fragment(schema: &EntitySchema, include_removed: bool) -> Criteria {
    match schema.deletion() {
        DeletionStrategy::Soft { flag } if !include_removed => {
            Criteria::new().with(schema.column(flag), QueryValue::Boolean(false))
        }
        _ => Criteria::new(),
    }
}

/// Merge the fragment into caller criteria without overwriting caller keys
pub fn apply_soft_delete(criteria: &mut Criteria, schema: &EntitySchema, include_removed: bool) {
    criteria.merge_missing(soft_delete_fragment(schema, include_removed));
}

/// `{ id }` plus the soft-delete fragment
pub fn by_id(schema: &EntitySchema, id: QueryValue, include_removed: bool) -> Criteria {
    let mut criteria = Criteria::new().with(schema.id_column(), id);
    apply_soft_delete(&mut criteria, schema, include_removed);
    criteria
}
