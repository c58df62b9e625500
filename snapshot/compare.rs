//! Normalized structural comparison of field specs.
//!
//! Field identity is not stable across schema versions (there are no
//! persistent field ids), so the differ infers identity from shape. Two
//! fields have the same shape when their type and options agree under the
//! normalization implemented here; names never take part in the comparison.

use serde_json::Value;
use crate::schema;

/// Option keys that are derived from the column spec rather than declared,
/// and therefore excluded from shape comparison.
const GENERATED_OPTION_KEYS: &[&str] = &["isUnique", "isIndexed"];

/// Decides whether two fields have the same shape.
///
/// Ignores field names, the generated option keys and the column spec. For
/// relationship fields the reciprocal field *name* is also ignored, so that a
/// rename of the other side of a bidirectional relationship does not read as
/// a change of this field; whether a reciprocal exists at all still counts.
pub fn fields_equal(source: &schema::FieldSpec, target: &schema::FieldSpec) -> bool {
    if source.type_ != target.type_ {
        return false;
    }
    match (&source.assoc, &target.assoc) {
        (None, None) => (),
        (Some(src), Some(tgt)) => {
            if !assocs_equal(src, tgt) {
                return false;
            }
        }
        _ => return false,
    }
    options_equal(&source.options, &target.options)
}

/// True when the two sides agree on everything except the reciprocal field
/// name. This is the signal that the *other* list renamed its relationship
/// field, which surfaces on this side as a rename, not an update.
pub fn reciprocal_renamed(source: &schema::FieldSpec, target: &schema::FieldSpec) -> bool {
    match (&source.assoc, &target.assoc) {
        (Some(src), Some(tgt)) => {
            fields_equal(source, target)
                && src.right.field.is_some()
                && src.right.field != tgt.right.field
        }
        _ => false,
    }
}

fn assocs_equal(source: &schema::AssociationSpec, target: &schema::AssociationSpec) -> bool {
    source.cardinality == target.cardinality
        && source.right.list == target.right.list
        && source.referenced() == target.referenced()
}

fn options_equal(
    source: &indexmap::IndexMap<String, Value>,
    target: &indexmap::IndexMap<String, Value>,
) -> bool {
    let relevant = |map: &indexmap::IndexMap<String, Value>| -> Vec<String> {
        map.iter()
            .filter(|(key, value)| {
                !GENERATED_OPTION_KEYS.contains(&key.as_str()) && !value.is_null()
            })
            .map(|(key, _)| key.clone())
            .collect()
    };

    let source_keys = relevant(source);
    if source_keys.len() != relevant(target).len() {
        return false;
    }
    source_keys.iter().all(|key| match target.get(key) {
        Some(tgt_value) => values_equal(&source[key], tgt_value),
        None => false,
    })
}

/// Structural equality over option values. Values of different kind are
/// always unequal; absent keys and explicit nulls are interchangeable.
pub fn values_equal(source: &Value, target: &Value) -> bool {
    match (source, target) {
        (Value::Object(src), Value::Object(tgt)) => {
            let relevant = |map: &serde_json::Map<String, Value>| {
                map.iter().filter(|(_, v)| !v.is_null()).count()
            };
            if relevant(src) != relevant(tgt) {
                return false;
            }
            src.iter()
                .filter(|(_, value)| !value.is_null())
                .all(|(key, value)| match tgt.get(key) {
                    Some(tgt_value) => values_equal(value, tgt_value),
                    None => false,
                })
        }
        (Value::Array(src), Value::Array(tgt)) => {
            src.len() == tgt.len()
                && src.iter().zip(tgt.iter()).all(|(s, t)| values_equal(s, t))
        }
        (Value::Null, Value::Null) => true,
        (Value::Bool(src), Value::Bool(tgt)) => src == tgt,
        (Value::Number(src), Value::Number(tgt)) => src == tgt,
        (Value::String(src), Value::String(tgt)) => src == tgt,
        _ => false,
    }
}
