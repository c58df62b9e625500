//! Physical representation of relationships: foreign-key columns and pivot
//! tables.

use anyhow::{bail, Result};
use remold_snapshot::schema::{AssociationSpec, Cardinality};
use sqlx::any::AnyKind;
use crate::sql_writer::SqlWriter;
use super::{ddl, SqlStep};

/// Where an association physically lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Structure {
    ForeignKey(FkColumn),
    Pivot(PivotTable),
}

/// A foreign-key column named after the declaring field, referencing the
/// other table's `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct FkColumn {
    pub table: String,
    pub column: String,
    pub references: String,
}

/// A two-column pivot table. Column names carry the table names so a
/// self-referential relationship still gets two distinct columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct PivotTable {
    pub table: String,
    pub left_table: String,
    pub left_column: String,
    pub right_table: String,
    pub right_column: String,
}

/// Maps cardinality and reciprocal presence to the physical shape. A
/// standalone `1:1` or `1:N` has nowhere to put its foreign key; declaring it
/// is an error surfaced here rather than silently skipped.
pub(super) fn structure(assoc: &AssociationSpec) -> Result<Structure> {
    let left = &assoc.left;
    let right = &assoc.right;
    Ok(match (assoc.cardinality, right.field.as_deref()) {
        (Cardinality::ManyToOne, _) | (Cardinality::OneToOne, Some(_)) => {
            Structure::ForeignKey(FkColumn {
                table: left.list.clone(),
                column: left.field.clone(),
                references: right.list.clone(),
            })
        }
        (Cardinality::OneToMany, Some(reciprocal)) => Structure::ForeignKey(FkColumn {
            table: right.list.clone(),
            column: reciprocal.to_owned(),
            references: left.list.clone(),
        }),
        (Cardinality::ManyToMany, reciprocal) => {
            let table = match reciprocal {
                None => format!("{}_{}_many", left.list, left.field),
                Some(reciprocal) => {
                    format!("{}_{}_{}_{}", left.list, left.field, right.list, reciprocal)
                }
            };
            Structure::Pivot(PivotTable {
                table,
                left_table: left.list.clone(),
                left_column: format!("{}_left_id", left.list),
                right_table: right.list.clone(),
                right_column: format!("{}_right_id", right.list),
            })
        }
        (cardinality, None) => bail!(
            "a standalone {} relationship from {}.{} has no physical representation, \
             declare a reciprocal field on {}",
            cardinality,
            left.list,
            left.field,
            right.list,
        ),
    })
}

fn fk_constraint_name(fk: &FkColumn) -> String {
    format!("{}_{}_foreign", fk.table, fk.column)
}

pub(super) fn create_fk_steps(kind: AnyKind, fk: &FkColumn) -> Vec<SqlStep> {
    let mut add = SqlWriter::new(kind);
    add.write_str("ALTER TABLE ");
    add.write_name(&fk.table);
    add.write_str(" ADD COLUMN ");
    add.write_name(&fk.column);
    write!(add, " {}", ddl::fk_column_type(kind));

    let mut steps = vec![
        SqlStep::new(
            add.build(),
            format!("Adding foreign key column {}.{}", fk.table, fk.column),
        ),
        ddl::create_index_step(kind, &fk.table, &fk.column, false),
    ];

    // SQLite cannot add a foreign key to an existing table; the column and
    // index still give us the join shape.
    if kind != AnyKind::Sqlite {
        let mut constraint = SqlWriter::new(kind);
        constraint.write_str("ALTER TABLE ");
        constraint.write_name(&fk.table);
        constraint.write_str(" ADD CONSTRAINT ");
        constraint.write_name(&fk_constraint_name(fk));
        constraint.write_str(" FOREIGN KEY (");
        constraint.write_name(&fk.column);
        constraint.write_str(") REFERENCES ");
        constraint.write_name(&fk.references);
        constraint.write_str(" (");
        constraint.write_name("id");
        constraint.write_str(")");
        steps.push(SqlStep::new(
            constraint.build(),
            format!("Constraining {}.{} to {}", fk.table, fk.column, fk.references),
        ));
    }
    steps
}

pub(super) fn drop_fk_steps(kind: AnyKind, fk: &FkColumn) -> Vec<SqlStep> {
    let mut steps = Vec::new();

    if kind != AnyKind::Sqlite {
        let mut constraint = SqlWriter::new(kind);
        constraint.write_str("ALTER TABLE ");
        constraint.write_name(&fk.table);
        constraint.write_str(match kind {
            AnyKind::MySql => " DROP FOREIGN KEY ",
            _ => " DROP CONSTRAINT ",
        });
        constraint.write_name(&fk_constraint_name(fk));
        steps.push(SqlStep::new(
            constraint.build(),
            format!("Dropping foreign key constraint on {}.{}", fk.table, fk.column),
        ));
    }

    steps.push(ddl::drop_index_step(kind, &fk.table, &fk.column, false));

    let mut drop = SqlWriter::new(kind);
    drop.write_str("ALTER TABLE ");
    drop.write_name(&fk.table);
    drop.write_str(" DROP COLUMN ");
    drop.write_name(&fk.column);
    steps.push(SqlStep::new(
        drop.build(),
        format!("Dropping foreign key column {}.{}", fk.table, fk.column),
    ));
    steps
}

pub(super) fn create_pivot_steps(kind: AnyKind, pivot: &PivotTable) -> Vec<SqlStep> {
    let fk_type = ddl::fk_column_type(kind);
    let mut sql = SqlWriter::new(kind);
    sql.write_str("CREATE TABLE ");
    sql.write_name(&pivot.table);
    sql.write_str(" (");
    sql.write_name(&pivot.left_column);
    write!(sql, " {}, ", fk_type);
    sql.write_name(&pivot.right_column);
    write!(sql, " {}, FOREIGN KEY (", fk_type);
    sql.write_name(&pivot.left_column);
    sql.write_str(") REFERENCES ");
    sql.write_name(&pivot.left_table);
    sql.write_str(" (");
    sql.write_name("id");
    sql.write_str("), FOREIGN KEY (");
    sql.write_name(&pivot.right_column);
    sql.write_str(") REFERENCES ");
    sql.write_name(&pivot.right_table);
    sql.write_str(" (");
    sql.write_name("id");
    sql.write_str("))");

    vec![
        SqlStep::new(sql.build(), format!("Creating pivot table {}", pivot.table)),
        ddl::create_index_step(kind, &pivot.table, &pivot.left_column, false),
        ddl::create_index_step(kind, &pivot.table, &pivot.right_column, false),
    ]
}

pub(super) fn drop_pivot_steps(kind: AnyKind, pivot: &PivotTable) -> Vec<SqlStep> {
    let mut sql = SqlWriter::new(kind);
    sql.write_str("DROP TABLE ");
    sql.write_name(&pivot.table);
    vec![SqlStep::new(
        sql.build(),
        format!("Dropping pivot table {}", pivot.table),
    )]
}

pub(super) fn create_structure_steps(kind: AnyKind, structure: &Structure) -> Vec<SqlStep> {
    match structure {
        Structure::ForeignKey(fk) => create_fk_steps(kind, fk),
        Structure::Pivot(pivot) => create_pivot_steps(kind, pivot),
    }
}

pub(super) fn drop_structure_steps(kind: AnyKind, structure: &Structure) -> Vec<SqlStep> {
    match structure {
        Structure::ForeignKey(fk) => drop_fk_steps(kind, fk),
        Structure::Pivot(pivot) => drop_pivot_steps(kind, pivot),
    }
}

fn rename_table_step(kind: AnyKind, from: &str, to: &str) -> SqlStep {
    let mut sql = SqlWriter::new(kind);
    match kind {
        AnyKind::MySql => {
            sql.write_str("RENAME TABLE ");
            sql.write_name(from);
            sql.write_str(" TO ");
            sql.write_name(to);
        }
        _ => {
            sql.write_str("ALTER TABLE ");
            sql.write_name(from);
            sql.write_str(" RENAME TO ");
            sql.write_name(to);
        }
    }
    SqlStep::new(sql.build(), format!("Renaming table {} to {}", from, to))
}

fn fk_rename_def(kind: AnyKind, column: &str) -> ddl::ColumnDef {
    ddl::ColumnDef {
        name: column.to_owned(),
        sql_type: ddl::fk_column_type(kind).to_owned(),
        not_null: false,
        unsigned: false,
        default: None,
    }
}

/// Renames the structure in place. Index and constraint names embed the old
/// column name, so a column rename re-creates them under the new name.
pub(super) fn rename_structure_steps(
    kind: AnyKind,
    before: &Structure,
    after: &Structure,
) -> Result<Vec<SqlStep>> {
    let mut steps = Vec::new();
    match (before, after) {
        (Structure::ForeignKey(old), Structure::ForeignKey(new)) => {
            if old.table != new.table {
                bail!(
                    "relationship rename cannot move its column from table {} to {}",
                    old.table,
                    new.table,
                );
            }
            if old.column == new.column {
                return Ok(steps);
            }
            if kind != AnyKind::Sqlite {
                let mut constraint = SqlWriter::new(kind);
                constraint.write_str("ALTER TABLE ");
                constraint.write_name(&old.table);
                constraint.write_str(match kind {
                    AnyKind::MySql => " DROP FOREIGN KEY ",
                    _ => " DROP CONSTRAINT ",
                });
                constraint.write_name(&fk_constraint_name(old));
                steps.push(SqlStep::new(
                    constraint.build(),
                    format!("Dropping foreign key constraint on {}.{}", old.table, old.column),
                ));
            }
            steps.push(ddl::drop_index_step(kind, &old.table, &old.column, false));
            steps.push(ddl::rename_column_step(
                kind,
                &old.table,
                &old.column,
                &new.column,
                &fk_rename_def(kind, &new.column),
            ));
            steps.push(ddl::create_index_step(kind, &new.table, &new.column, false));
            if kind != AnyKind::Sqlite {
                let mut constraint = SqlWriter::new(kind);
                constraint.write_str("ALTER TABLE ");
                constraint.write_name(&new.table);
                constraint.write_str(" ADD CONSTRAINT ");
                constraint.write_name(&fk_constraint_name(new));
                constraint.write_str(" FOREIGN KEY (");
                constraint.write_name(&new.column);
                constraint.write_str(") REFERENCES ");
                constraint.write_name(&new.references);
                constraint.write_str(" (");
                constraint.write_name("id");
                constraint.write_str(")");
                steps.push(SqlStep::new(
                    constraint.build(),
                    format!("Constraining {}.{} to {}", new.table, new.column, new.references),
                ));
            }
        }
        (Structure::Pivot(old), Structure::Pivot(new)) => {
            if old == new {
                return Ok(steps);
            }
            steps.push(ddl::drop_index_step(kind, &old.table, &old.left_column, false));
            steps.push(ddl::drop_index_step(kind, &old.table, &old.right_column, false));
            if old.table != new.table {
                steps.push(rename_table_step(kind, &old.table, &new.table));
            }
            // Columns map by the table they reference; when the declaring
            // side flipped, the old left column becomes the new right one.
            let (left_target, right_target) = if old.left_table == new.left_table {
                (&new.left_column, &new.right_column)
            } else {
                (&new.right_column, &new.left_column)
            };
            if old.left_column != *left_target {
                steps.push(ddl::rename_column_step(
                    kind,
                    &new.table,
                    &old.left_column,
                    left_target,
                    &fk_rename_def(kind, left_target),
                ));
            }
            if old.right_column != *right_target {
                steps.push(ddl::rename_column_step(
                    kind,
                    &new.table,
                    &old.right_column,
                    right_target,
                    &fk_rename_def(kind, right_target),
                ));
            }
            steps.push(ddl::create_index_step(kind, &new.table, &new.left_column, false));
            steps.push(ddl::create_index_step(kind, &new.table, &new.right_column, false));
        }
        _ => bail!("relationship rename cannot change its physical structure"),
    }
    Ok(steps)
}

pub(super) fn lower_create(kind: AnyKind, assoc: &AssociationSpec) -> Result<Vec<SqlStep>> {
    Ok(create_structure_steps(kind, &structure(assoc)?))
}

pub(super) fn lower_remove(kind: AnyKind, assoc: &AssociationSpec) -> Result<Vec<SqlStep>> {
    Ok(drop_structure_steps(kind, &structure(assoc)?))
}

pub(super) fn lower_rename(
    kind: AnyKind,
    before: &AssociationSpec,
    assoc: &AssociationSpec,
) -> Result<Vec<SqlStep>> {
    rename_structure_steps(kind, &structure(before)?, &structure(assoc)?)
}

#[cfg(test)]
mod tests {
    use remold_snapshot::schema::{SideRef, TargetRef};
    use super::*;

    fn assoc(
        cardinality: Cardinality,
        left: (&str, &str),
        right: &str,
        reciprocal: Option<&str>,
    ) -> AssociationSpec {
        AssociationSpec {
            cardinality,
            left: SideRef { list: left.0.into(), field: left.1.into() },
            right: TargetRef { list: right.into(), field: reciprocal.map(Into::into) },
        }
    }

    #[test]
    fn many_to_one_puts_the_column_on_the_declaring_side() {
        let spec = assoc(Cardinality::ManyToOne, ("Todo", "category"), "Category", None);
        match structure(&spec).unwrap() {
            Structure::ForeignKey(fk) => {
                assert_eq!(fk.table, "Todo");
                assert_eq!(fk.column, "category");
                assert_eq!(fk.references, "Category");
            }
            other => panic!("expected a foreign key, got {:?}", other),
        }
    }

    #[test]
    fn referenced_one_to_many_puts_the_column_on_the_other_side() {
        let spec = assoc(Cardinality::OneToMany, ("Category", "todos"), "Todo", Some("category"));
        match structure(&spec).unwrap() {
            Structure::ForeignKey(fk) => {
                assert_eq!(fk.table, "Todo");
                assert_eq!(fk.column, "category");
                assert_eq!(fk.references, "Category");
            }
            other => panic!("expected a foreign key, got {:?}", other),
        }
    }

    #[test]
    fn pivot_naming_standalone_vs_referenced() {
        let standalone = assoc(Cardinality::ManyToMany, ("Todo", "tags"), "Tag", None);
        match structure(&standalone).unwrap() {
            Structure::Pivot(pivot) => {
                assert_eq!(pivot.table, "Todo_tags_many");
                assert_eq!(pivot.left_column, "Todo_left_id");
                assert_eq!(pivot.right_column, "Tag_right_id");
            }
            other => panic!("expected a pivot, got {:?}", other),
        }

        let referenced = assoc(Cardinality::ManyToMany, ("Todo", "tags"), "Tag", Some("todos"));
        match structure(&referenced).unwrap() {
            Structure::Pivot(pivot) => assert_eq!(pivot.table, "Todo_tags_Tag_todos"),
            other => panic!("expected a pivot, got {:?}", other),
        }
    }

    #[test]
    fn standalone_one_to_many_is_rejected() {
        let spec = assoc(Cardinality::OneToMany, ("Category", "todos"), "Todo", None);
        assert!(structure(&spec).is_err());
        let spec = assoc(Cardinality::OneToOne, ("User", "profile"), "Profile", None);
        assert!(structure(&spec).is_err());
    }

    #[test]
    fn foreign_key_create_sql() {
        let spec = assoc(Cardinality::ManyToOne, ("Todo", "category"), "Category", None);
        let steps = lower_create(AnyKind::Postgres, &spec).unwrap();
        let sql: Vec<_> = steps.iter().map(|s| s.sql.as_str()).collect();
        assert_eq!(
            sql,
            vec![
                r#"ALTER TABLE "Todo" ADD COLUMN "category" INTEGER"#,
                r#"CREATE INDEX "Todo_category_index" ON "Todo" ("category")"#,
                r#"ALTER TABLE "Todo" ADD CONSTRAINT "Todo_category_foreign" FOREIGN KEY ("category") REFERENCES "Category" ("id")"#,
            ],
        );
    }

    #[test]
    fn sqlite_skips_foreign_key_constraints_on_alter() {
        let spec = assoc(Cardinality::ManyToOne, ("Todo", "category"), "Category", None);
        let steps = lower_create(AnyKind::Sqlite, &spec).unwrap();
        assert_eq!(steps.len(), 2);
        assert!(!steps.iter().any(|s| s.sql.contains("CONSTRAINT")));
    }

    #[test]
    fn pivot_create_sql() {
        let spec = assoc(Cardinality::ManyToMany, ("Todo", "tags"), "Tag", None);
        let steps = lower_create(AnyKind::Sqlite, &spec).unwrap();
        assert_eq!(
            steps[0].sql,
            r#"CREATE TABLE "Todo_tags_many" ("Todo_left_id" INTEGER, "Tag_right_id" INTEGER, FOREIGN KEY ("Todo_left_id") REFERENCES "Todo" ("id"), FOREIGN KEY ("Tag_right_id") REFERENCES "Tag" ("id"))"#,
        );
        assert_eq!(steps.len(), 3);
    }

    #[test]
    fn pivot_rename_swaps_sides_when_left_changes() {
        let before = assoc(Cardinality::ManyToMany, ("Todo", "tags"), "Tag", Some("todos"));
        let after = assoc(Cardinality::ManyToMany, ("Tag", "todos"), "Todo", Some("tags"));
        let steps = lower_rename(AnyKind::Sqlite, &before, &after).unwrap();
        let sql: Vec<_> = steps.iter().map(|s| s.sql.as_str()).collect();
        assert!(sql.iter().any(|s| s.contains("RENAME TO")));
        // both columns keep pointing at the same tables under their new names
        assert!(sql.iter().any(|s| s.contains(r#""Tag_right_id" TO "Tag_left_id""#)));
    }
}
