//! Field-level diffing of two versions of the same list.
//!
//! There are no persistent field ids, so identity is inferred: first by name,
//! then by relative position among the fields left over, then by shape. The
//! heuristic favors the common case (unchanged fields keep their name,
//! additions and removals happen at the tail) and degrades to an add+remove
//! pair when inference fails.

use itertools::{EitherOrBoth, Itertools};
use remold_snapshot::{compare, schema};
use std::collections::HashSet;

/// Difference between a cached (`source`) and a current (`target`) version of
/// one list.
#[derive(Debug, Default)]
pub struct ListDiff {
    pub add: Vec<schema::FieldSpec>,
    pub update: Vec<FieldChange>,
    pub rename: Vec<FieldChange>,
    pub remove: Vec<schema::FieldSpec>,
}

#[derive(Debug)]
pub struct FieldChange {
    pub source: schema::FieldSpec,
    pub target: schema::FieldSpec,
}

impl ListDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty()
            && self.update.is_empty()
            && self.rename.is_empty()
            && self.remove.is_empty()
    }
}

/// Diffs the fields of `source` against `target`.
///
/// Pass 1 matches fields by name: a name present on both sides is either
/// unchanged, an update, or (when only the reciprocal field of a
/// relationship moved) a rename of the relationship. Pass 2 walks the
/// remaining fields of both sides in declaration order: positional pairs of
/// equal shape are renames, differing pairs become independent add+remove,
/// and whichever side runs long contributes trailing adds or removes.
pub fn diff_list_fields(source: &schema::ListSpec, target: &schema::ListSpec) -> ListDiff {
    let mut diff = ListDiff::default();
    let mut done: HashSet<&str> = HashSet::new();

    for target_field in target.fields.values() {
        let source_field = match source.fields.get(&target_field.name) {
            Some(field) => field,
            None => continue,
        };
        done.insert(target_field.name.as_str());

        if !compare::fields_equal(source_field, target_field) {
            diff.update.push(FieldChange {
                source: source_field.clone(),
                target: target_field.clone(),
            });
        } else if compare::reciprocal_renamed(source_field, target_field) {
            diff.rename.push(FieldChange {
                source: source_field.clone(),
                target: target_field.clone(),
            });
        }
    }

    let remaining_source = source.fields.values().filter(|f| !done.contains(f.name.as_str()));
    let remaining_target = target.fields.values().filter(|f| !done.contains(f.name.as_str()));

    for pair in remaining_source.zip_longest(remaining_target) {
        match pair {
            EitherOrBoth::Both(source_field, target_field) => {
                if compare::fields_equal(source_field, target_field) {
                    diff.rename.push(FieldChange {
                        source: source_field.clone(),
                        target: target_field.clone(),
                    });
                } else {
                    diff.add.push(target_field.clone());
                    diff.remove.push(source_field.clone());
                }
            }
            EitherOrBoth::Left(source_field) => diff.remove.push(source_field.clone()),
            EitherOrBoth::Right(target_field) => diff.add.push(target_field.clone()),
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use remold_snapshot::schema::{ColumnCall, FieldSpec, FieldType, ListSpec};
    use serde_json::json;
    use super::*;

    fn field(name: &str, type_: &str) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            type_: FieldType::Scalar(type_.into()),
            options: Default::default(),
            column_spec: vec![ColumnCall::new("text", vec![json!(name)])],
            assoc: None,
        }
    }

    fn list(name: &str, fields: Vec<FieldSpec>) -> ListSpec {
        ListSpec {
            name: name.into(),
            options: Default::default(),
            fields: fields.into_iter().map(|f| (f.name.clone(), f)).collect(),
        }
    }

    #[test]
    fn identical_lists_yield_empty_diff() {
        let a = list("Todo", vec![field("name", "Text"), field("done", "Checkbox")]);
        let b = list("Todo", vec![field("name", "Text"), field("done", "Checkbox")]);
        assert!(diff_list_fields(&a, &b).is_empty());
    }

    #[test]
    fn same_shape_same_position_is_a_rename() {
        let source = list("Todo", vec![field("a", "Text")]);
        let target = list("Todo", vec![field("b", "Text")]);
        let diff = diff_list_fields(&source, &target);
        assert!(diff.add.is_empty() && diff.remove.is_empty() && diff.update.is_empty());
        assert_eq!(diff.rename.len(), 1);
        assert_eq!(diff.rename[0].source.name, "a");
        assert_eq!(diff.rename[0].target.name, "b");
    }

    #[test]
    fn added_field_at_tail() {
        let source = list("Todo", vec![field("a", "Text"), field("b", "Text")]);
        let target = list(
            "Todo",
            vec![field("a", "Text"), field("b", "Text"), field("c", "Text")],
        );
        let diff = diff_list_fields(&source, &target);
        assert_eq!(diff.add.len(), 1);
        assert_eq!(diff.add[0].name, "c");
        assert!(diff.update.is_empty() && diff.rename.is_empty() && diff.remove.is_empty());
    }

    #[test]
    fn removed_field() {
        let source = list("Todo", vec![field("a", "Text"), field("b", "Text")]);
        let target = list("Todo", vec![field("a", "Text")]);
        let diff = diff_list_fields(&source, &target);
        assert_eq!(diff.remove.len(), 1);
        assert_eq!(diff.remove[0].name, "b");
        assert!(diff.add.is_empty() && diff.rename.is_empty());
    }

    #[test]
    fn changed_options_are_an_update() {
        let source = list("Todo", vec![field("a", "Text")]);
        let mut changed = field("a", "Text");
        changed.options.insert("isRequired".into(), json!(true));
        let target = list("Todo", vec![changed]);
        let diff = diff_list_fields(&source, &target);
        assert_eq!(diff.update.len(), 1);
        assert!(diff.rename.is_empty() && diff.add.is_empty() && diff.remove.is_empty());
    }

    #[test]
    fn different_shape_at_same_position_degrades_to_add_and_remove() {
        let source = list("Todo", vec![field("a", "Text")]);
        let target = list("Todo", vec![field("b", "Integer")]);
        let diff = diff_list_fields(&source, &target);
        assert_eq!(diff.add.len(), 1);
        assert_eq!(diff.remove.len(), 1);
        assert!(diff.rename.is_empty() && diff.update.is_empty());
    }

    #[test]
    fn rename_in_the_middle_keeps_neighbors_quiet() {
        let source = list(
            "Todo",
            vec![field("a", "Text"), field("middle", "Integer"), field("z", "Text")],
        );
        let target = list(
            "Todo",
            vec![field("a", "Text"), field("renamed", "Integer"), field("z", "Text")],
        );
        let diff = diff_list_fields(&source, &target);
        assert_eq!(diff.rename.len(), 1);
        assert_eq!(diff.rename[0].target.name, "renamed");
        assert!(diff.add.is_empty() && diff.remove.is_empty() && diff.update.is_empty());
    }
}
