//! Cardinality transitions: how an existing relationship's physical
//! structure turns into another one without losing more data than the new
//! shape can hold.

use anyhow::Result;
use remold_snapshot::schema::{AssociationSpec, Cardinality};
use sqlx::any::AnyKind;
use crate::report::ProgressReporter;
use crate::sql_writer::SqlWriter;
use super::assoc::{self, FkColumn, PivotTable, Structure};
use super::{ExecError, SqlStep};

/// How to get from one relationship structure to another.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Only the logical reference direction or strength changed; the column
    /// stays where it is.
    Noop,
    /// The foreign-key column moves to the other table; values are copied by
    /// joining through the old column.
    MoveSide,
    /// A foreign-key column becomes a pivot table; existing links become
    /// pivot rows.
    SingleToPivot,
    /// A pivot table collapses into a foreign-key column; at most one link
    /// per row survives.
    PivotToSingle,
    /// Same pivot shape under a different name; rename table and columns, no
    /// data copy.
    RenamePivot,
    /// The relationship now points at a different list; the old structure is
    /// dropped and the new one created empty.
    Rebuild,
}

enum Shape {
    FkLeft,
    FkRight,
    Pivot,
}

fn shape(spec: &AssociationSpec) -> Option<Shape> {
    match (spec.cardinality, spec.referenced()) {
        (Cardinality::ManyToOne, _) | (Cardinality::OneToOne, true) => Some(Shape::FkLeft),
        (Cardinality::OneToMany, true) => Some(Shape::FkRight),
        (Cardinality::ManyToMany, _) => Some(Shape::Pivot),
        _ => None,
    }
}

fn shape_desc(spec: &AssociationSpec) -> String {
    let declared = if spec.referenced() { "referenced" } else { "standalone" };
    format!("{} {}", spec.cardinality, declared)
}

fn same_endpoints(a: (&str, &str), b: (&str, &str)) -> bool {
    a == b || (a.0 == b.1 && a.1 == b.0)
}

/// Classifies the change between two association specs. Either spec mapping
/// to no physical shape at all is an [`ExecError::UnsupportedTransition`].
pub fn transition_for(before: &AssociationSpec, after: &AssociationSpec) -> Result<Transition> {
    let unsupported = || ExecError::UnsupportedTransition {
        before: shape_desc(before),
        after: shape_desc(after),
    };
    let (from, to) = match (shape(before), shape(after)) {
        (Some(from), Some(to)) => (from, to),
        _ => return Err(unsupported().into()),
    };

    let old = assoc::structure(before)?;
    let new = assoc::structure(after)?;
    if old == new {
        return Ok(Transition::Noop);
    }

    Ok(match (from, to, &old, &new) {
        (Shape::FkLeft, Shape::FkLeft, _, _) | (Shape::FkRight, Shape::FkRight, _, _) => {
            Transition::Rebuild
        }
        (_, _, Structure::ForeignKey(old_fk), Structure::ForeignKey(new_fk)) => {
            if new_fk.table == old_fk.references && new_fk.references == old_fk.table {
                Transition::MoveSide
            } else {
                Transition::Rebuild
            }
        }
        (_, _, Structure::ForeignKey(fk), Structure::Pivot(pivot)) => {
            if same_endpoints(
                (&fk.table, &fk.references),
                (&pivot.left_table, &pivot.right_table),
            ) {
                Transition::SingleToPivot
            } else {
                Transition::Rebuild
            }
        }
        (_, _, Structure::Pivot(pivot), Structure::ForeignKey(fk)) => {
            if same_endpoints(
                (&fk.table, &fk.references),
                (&pivot.left_table, &pivot.right_table),
            ) {
                Transition::PivotToSingle
            } else {
                Transition::Rebuild
            }
        }
        (_, _, Structure::Pivot(old_pivot), Structure::Pivot(new_pivot)) => {
            if same_endpoints(
                (&old_pivot.left_table, &old_pivot.right_table),
                (&new_pivot.left_table, &new_pivot.right_table),
            ) {
                Transition::RenamePivot
            } else {
                Transition::Rebuild
            }
        }
    })
}

pub(super) fn lower_update(
    kind: AnyKind,
    before: &AssociationSpec,
    after: &AssociationSpec,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<SqlStep>> {
    let transition = transition_for(before, after)?;
    let old = assoc::structure(before)?;
    let new = assoc::structure(after)?;

    let mut steps = Vec::new();
    match (transition, &old, &new) {
        (Transition::Noop, _, _) => {}
        (Transition::Rebuild, _, _) => {
            reporter.warn(&format!(
                "relationship {}.{} changed its target, existing links are dropped",
                after.left.list, after.left.field,
            ));
            steps.extend(assoc::drop_structure_steps(kind, &old));
            steps.extend(assoc::create_structure_steps(kind, &new));
        }
        (Transition::RenamePivot, _, _) => {
            steps.extend(assoc::rename_structure_steps(kind, &old, &new)?);
        }
        (Transition::MoveSide, Structure::ForeignKey(old_fk), Structure::ForeignKey(new_fk)) => {
            if before.cardinality != Cardinality::OneToOne {
                reporter.warn(&format!(
                    "relationship {}.{} moves its column to {}, rows with several \
                     links keep only one",
                    after.left.list, after.left.field, new_fk.table,
                ));
            }
            steps.extend(assoc::create_fk_steps(kind, new_fk));
            steps.push(copy_fk_to_fk(kind, old_fk, new_fk));
            steps.extend(assoc::drop_fk_steps(kind, old_fk));
        }
        (Transition::SingleToPivot, Structure::ForeignKey(fk), Structure::Pivot(pivot)) => {
            steps.extend(assoc::create_pivot_steps(kind, pivot));
            steps.push(copy_fk_to_pivot(kind, fk, pivot));
            steps.extend(assoc::drop_fk_steps(kind, fk));
        }
        (Transition::PivotToSingle, Structure::Pivot(pivot), Structure::ForeignKey(fk)) => {
            reporter.warn(&format!(
                "relationship {}.{} collapses to a single column, rows with several \
                 links keep only one",
                after.left.list, after.left.field,
            ));
            steps.extend(assoc::create_fk_steps(kind, fk));
            steps.push(copy_pivot_to_fk(kind, pivot, fk));
            steps.extend(assoc::drop_pivot_steps(kind, pivot));
        }
        (transition, old, new) => {
            // transition_for only pairs a transition with its own shapes
            unreachable!("{:?} does not apply to {:?} -> {:?}", transition, old, new)
        }
    }
    Ok(steps)
}

/// `new.table` is what `old.column` was pointing at, so every row of the new
/// side picks one of the rows that pointed at it.
fn copy_fk_to_fk(kind: AnyKind, old: &FkColumn, new: &FkColumn) -> SqlStep {
    let mut sql = SqlWriter::new(kind);
    sql.write_str("UPDATE ");
    sql.write_name(&new.table);
    sql.write_str(" SET ");
    sql.write_name(&new.column);
    sql.write_str(" = (SELECT MAX(src.");
    sql.write_name("id");
    sql.write_str(") FROM ");
    sql.write_name(&old.table);
    sql.write_str(" AS src WHERE src.");
    sql.write_name(&old.column);
    sql.write_str(" = ");
    sql.write_name(&new.table);
    sql.write_str(".");
    sql.write_name("id");
    sql.write_str(")");
    SqlStep::new(
        sql.build(),
        format!("Copying links from {}.{} to {}.{}", old.table, old.column, new.table, new.column),
    )
}

fn copy_fk_to_pivot(kind: AnyKind, fk: &FkColumn, pivot: &PivotTable) -> SqlStep {
    // orient the select by which pivot side the old column's table is
    let (first, second) = if fk.table == pivot.left_table {
        (&pivot.left_column, &pivot.right_column)
    } else {
        (&pivot.right_column, &pivot.left_column)
    };

    let mut sql = SqlWriter::new(kind);
    sql.write_str("INSERT INTO ");
    sql.write_name(&pivot.table);
    sql.write_str(" (");
    sql.write_name(first);
    sql.write_str(", ");
    sql.write_name(second);
    sql.write_str(") SELECT ");
    sql.write_name("id");
    sql.write_str(", ");
    sql.write_name(&fk.column);
    sql.write_str(" FROM ");
    sql.write_name(&fk.table);
    sql.write_str(" WHERE ");
    sql.write_name(&fk.column);
    sql.write_str(" IS NOT NULL");
    SqlStep::new(
        sql.build(),
        format!("Copying links from {}.{} into {}", fk.table, fk.column, pivot.table),
    )
}

fn copy_pivot_to_fk(kind: AnyKind, pivot: &PivotTable, fk: &FkColumn) -> SqlStep {
    let (own, other) = if fk.table == pivot.left_table {
        (&pivot.left_column, &pivot.right_column)
    } else {
        (&pivot.right_column, &pivot.left_column)
    };

    let mut sql = SqlWriter::new(kind);
    sql.write_str("UPDATE ");
    sql.write_name(&fk.table);
    sql.write_str(" SET ");
    sql.write_name(&fk.column);
    sql.write_str(" = (SELECT MAX(p.");
    sql.write_name(other);
    sql.write_str(") FROM ");
    sql.write_name(&pivot.table);
    sql.write_str(" AS p WHERE p.");
    sql.write_name(own);
    sql.write_str(" = ");
    sql.write_name(&fk.table);
    sql.write_str(".");
    sql.write_name("id");
    sql.write_str(")");
    SqlStep::new(
        sql.build(),
        format!("Copying links from {} into {}.{}", pivot.table, fk.table, fk.column),
    )
}
