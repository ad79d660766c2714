//! Reconciliation: pair each domain object with its persisted record, if any

use crate::context::Scope;
use crate::error::StorageError;
use crate::fetch::{Predicate, RawFetch};
use crate::storable::Storable;
use crate::types::{Record, Value};

/// Pair `objects` with existing records using one primary-key lookup.
///
/// Output order follows input order. Entities without a primary key never match.
pub fn reconcile<T: Storable>(
    scope: &Scope,
    objects: Vec<T>,
) -> Result<Vec<(T, Option<Record>)>, StorageError> {
    let Some(key_field) = T::primary_key_field() else {
        return Ok(objects.into_iter().map(|object| (object, None)).collect());
    };
    if objects.is_empty() {
        return Ok(Vec::new());
    }

    // Look keys up in the stored kind too, so `Integer(7)` finds a stored `Text("7")`.
    let key_kind = scope
        .coordinator()
        .model()
        .find_entity(T::entity_name())
        .and_then(|entity| entity.find_attribute(key_field))
        .map(|attribute| attribute.kind);
    let mut keys: Vec<Value> = Vec::with_capacity(objects.len());
    for value in objects.iter().filter_map(Storable::primary_value) {
        if let Some(coerced) = key_kind.map(|kind| kind.coerce(&value)) {
            if coerced != value {
                keys.push(coerced);
            }
        }
        keys.push(value);
    }
    if keys.is_empty() {
        return Ok(objects.into_iter().map(|object| (object, None)).collect());
    }

    let fetch = RawFetch {
        predicate: Predicate::In(key_field.to_string(), keys),
        ..RawFetch::entity(T::entity_name())
    };
    let candidates = scope.fetch(&fetch)?;
    Ok(match_candidates(objects, &candidates, key_field))
}

/// Select for each object the candidate whose stored key it reports equal.
pub fn match_candidates<T: Storable>(
    objects: Vec<T>,
    candidates: &[Record],
    key_field: &str,
) -> Vec<(T, Option<Record>)> {
    objects
        .into_iter()
        .map(|object| {
            let found = candidates
                .iter()
                .find(|candidate| object.is_primary_value_equal(candidate.get(key_field)))
                .cloned();
            (object, found)
        })
        .collect()
}
