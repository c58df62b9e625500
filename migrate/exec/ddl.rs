//! Lowers list and field migrations into dialect-specific DDL.

use anyhow::{bail, ensure, Context, Result};
use remold_snapshot::schema::{ColumnCall, FieldSpec, ListOptions};
use sqlx::any::AnyKind;
use crate::sql_writer::SqlWriter;
use super::SqlStep;

/// A column definition rendered from one column-builder call. `unique` and
/// `index` are not part of the definition; they become separately named
/// statements so a later migration can drop them by name.
#[derive(Debug)]
pub(super) struct ColumnDef {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    pub unsigned: bool,
    pub default: Option<serde_json::Value>,
}

impl ColumnDef {
    pub fn render(&self, sql: &mut SqlWriter) {
        sql.write_name(&self.name);
        write!(sql, " {}", self.sql_type);
        if self.unsigned && sql.kind() == AnyKind::MySql {
            sql.write_str(" UNSIGNED");
        }
        if self.not_null {
            sql.write_str(" NOT NULL");
        }
        if let Some(value) = &self.default {
            sql.write_str(" DEFAULT ");
            write_literal(sql, value);
        }
    }
}

pub(super) fn column_def(kind: AnyKind, call: &ColumnCall) -> Result<ColumnDef> {
    let name = call
        .column_name()
        .with_context(|| format!("column call {:?} has no column name", call.method))?;
    let default = call
        .modifier("defaultTo")
        .and_then(|m| m.args.first())
        .cloned();
    Ok(ColumnDef {
        name: name.to_owned(),
        sql_type: sql_type(kind, call)?,
        not_null: call.has_modifier("notNullable"),
        unsigned: call.has_modifier("unsigned"),
        default,
    })
}

fn sql_type(kind: AnyKind, call: &ColumnCall) -> Result<String> {
    let arg_u64 = |idx: usize| call.args.get(idx).and_then(|v| v.as_u64());
    Ok(match call.method.as_str() {
        "text" => "TEXT".into(),
        "string" => format!("VARCHAR({})", arg_u64(1).unwrap_or(255)),
        "integer" => match kind {
            AnyKind::MySql => "INT".into(),
            _ => "INTEGER".into(),
        },
        "bigInteger" => "BIGINT".into(),
        "boolean" => "BOOLEAN".into(),
        "float" => match kind {
            AnyKind::MySql => "FLOAT".into(),
            _ => "REAL".into(),
        },
        "double" => match kind {
            AnyKind::Postgres => "DOUBLE PRECISION".into(),
            AnyKind::MySql => "DOUBLE".into(),
            AnyKind::Sqlite => "REAL".into(),
        },
        "decimal" => {
            format!("DECIMAL({}, {})", arg_u64(1).unwrap_or(8), arg_u64(2).unwrap_or(2))
        }
        "date" => "DATE".into(),
        "time" => "TIME".into(),
        "datetime" | "timestamp" => match kind {
            AnyKind::Postgres => "TIMESTAMPTZ".into(),
            _ => "DATETIME".into(),
        },
        "json" => match kind {
            AnyKind::Sqlite => "TEXT".into(),
            _ => "JSON".into(),
        },
        "jsonb" => match kind {
            AnyKind::Postgres => "JSONB".into(),
            AnyKind::MySql => "JSON".into(),
            AnyKind::Sqlite => "TEXT".into(),
        },
        "uuid" => match kind {
            AnyKind::Postgres => "UUID".into(),
            _ => "CHAR(36)".into(),
        },
        "increments" => match kind {
            AnyKind::Postgres => "SERIAL PRIMARY KEY".into(),
            AnyKind::MySql => "INT UNSIGNED AUTO_INCREMENT PRIMARY KEY".into(),
            AnyKind::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT".into(),
        },
        other => bail!("unsupported column method {:?}", other),
    })
}

/// Foreign key columns match the type `increments` gives the referenced id.
pub(super) fn fk_column_type(kind: AnyKind) -> &'static str {
    match kind {
        AnyKind::MySql => "INT UNSIGNED",
        _ => "INTEGER",
    }
}

fn write_literal(sql: &mut SqlWriter, value: &serde_json::Value) {
    match value {
        serde_json::Value::Null => sql.write_str("NULL"),
        serde_json::Value::Bool(true) => sql.write_str("TRUE"),
        serde_json::Value::Bool(false) => sql.write_str("FALSE"),
        serde_json::Value::Number(n) => write!(sql, "{}", n),
        serde_json::Value::String(s) => sql.write_literal_str(s),
        // arrays and objects go into text/json columns as their JSON form
        other => sql.write_literal_str(&other.to_string()),
    }
}

pub(super) fn index_name(table: &str, column: &str) -> String {
    format!("{}_{}_index", table, column)
}

pub(super) fn unique_name(table: &str, column: &str) -> String {
    format!("{}_{}_unique", table, column)
}

pub(super) fn create_index_step(kind: AnyKind, table: &str, column: &str, unique: bool) -> SqlStep {
    let mut sql = SqlWriter::new(kind);
    sql.write_str(if unique { "CREATE UNIQUE INDEX " } else { "CREATE INDEX " });
    let name = if unique { unique_name(table, column) } else { index_name(table, column) };
    sql.write_name(&name);
    sql.write_str(" ON ");
    sql.write_name(table);
    sql.write_str(" (");
    sql.write_name(column);
    sql.write_str(")");
    let what = if unique {
        format!("Adding unique constraint on {}.{}", table, column)
    } else {
        format!("Indexing {}.{}", table, column)
    };
    SqlStep::new(sql.build(), what)
}

pub(super) fn drop_index_step(kind: AnyKind, table: &str, column: &str, unique: bool) -> SqlStep {
    let name = if unique { unique_name(table, column) } else { index_name(table, column) };
    let mut sql = SqlWriter::new(kind);
    match kind {
        AnyKind::MySql => {
            sql.write_str("DROP INDEX ");
            sql.write_name(&name);
            sql.write_str(" ON ");
            sql.write_name(table);
        }
        _ => {
            sql.write_str("DROP INDEX IF EXISTS ");
            sql.write_name(&name);
        }
    }
    let what = if unique {
        format!("Dropping unique constraint on {}.{}", table, column)
    } else {
        format!("Dropping index on {}.{}", table, column)
    };
    SqlStep::new(sql.build(), what)
}

/// Index/unique statements for one column, from its modifiers.
fn constraint_steps(kind: AnyKind, table: &str, call: &ColumnCall) -> Vec<SqlStep> {
    let column = match call.column_name() {
        Some(name) => name,
        None => return Vec::new(),
    };
    let mut steps = Vec::new();
    if call.has_modifier("unique") {
        steps.push(create_index_step(kind, table, column, true));
    }
    if call.has_modifier("index") {
        steps.push(create_index_step(kind, table, column, false));
    }
    steps
}

pub(super) fn lower_list_create(
    kind: AnyKind,
    name: &str,
    options: &ListOptions,
    fields: &[FieldSpec],
) -> Result<Vec<SqlStep>> {
    let table = options.table_name.as_deref().unwrap_or(name);

    let mut defs = Vec::new();
    for field in fields {
        // relationship structure comes from separate association migrations
        if field.type_.is_relationship() {
            continue;
        }
        for call in &field.column_spec {
            defs.push((column_def(kind, call)?, call));
        }
    }
    ensure!(!defs.is_empty(), "list {:?} has no physical columns", name);

    let mut sql = SqlWriter::new(kind);
    sql.write_str("CREATE TABLE ");
    sql.write_name(table);
    sql.write_str(" (");
    for (idx, (def, _)) in defs.iter().enumerate() {
        if idx > 0 {
            sql.write_str(", ");
        }
        def.render(&mut sql);
    }
    sql.write_str(")");

    let mut steps = vec![SqlStep::new(sql.build(), format!("Creating table {}", table))];
    for (_, call) in &defs {
        steps.extend(constraint_steps(kind, table, call));
    }
    Ok(steps)
}

pub(super) fn lower_list_remove(kind: AnyKind, name: &str, options: &ListOptions) -> Vec<SqlStep> {
    let table = options.table_name.as_deref().unwrap_or(name);
    let mut sql = SqlWriter::new(kind);
    sql.write_str("DROP TABLE ");
    sql.write_name(table);
    vec![SqlStep::new(sql.build(), format!("Dropping table {}", table))]
}

pub(super) fn lower_field_create(
    kind: AnyKind,
    table: &str,
    field: &FieldSpec,
) -> Result<Vec<SqlStep>> {
    let mut steps = Vec::new();
    for call in &field.column_spec {
        let def = column_def(kind, call)?;
        let mut sql = SqlWriter::new(kind);
        sql.write_str("ALTER TABLE ");
        sql.write_name(table);
        sql.write_str(" ADD COLUMN ");
        def.render(&mut sql);
        steps.push(SqlStep::new(
            sql.build(),
            format!("Adding column {}.{}", table, def.name),
        ));
        steps.extend(constraint_steps(kind, table, call));
    }
    Ok(steps)
}

pub(super) fn lower_field_update(
    kind: AnyKind,
    table: &str,
    before: &FieldSpec,
    field: &FieldSpec,
) -> Result<Vec<SqlStep>> {
    ensure!(
        before.column_spec.len() == field.column_spec.len(),
        "field {:?} changed its column count, drop and re-create it instead",
        field.name,
    );

    let mut steps = Vec::new();
    for (old_call, call) in before.column_spec.iter().zip(&field.column_spec) {
        let old = column_def(kind, old_call)?;
        let def = column_def(kind, call)?;
        ensure!(
            old.name == def.name,
            "column {:?} changed its name inside an update",
            old.name,
        );

        if old.sql_type != def.sql_type
            || old.not_null != def.not_null
            || old.unsigned != def.unsigned
            || old.default != def.default
        {
            match kind {
                AnyKind::Postgres => steps.extend(alter_column_postgres(table, &old, &def)),
                AnyKind::MySql => {
                    let mut sql = SqlWriter::new(kind);
                    sql.write_str("ALTER TABLE ");
                    sql.write_name(table);
                    sql.write_str(" MODIFY COLUMN ");
                    def.render(&mut sql);
                    steps.push(SqlStep::new(
                        sql.build(),
                        format!("Altering column {}.{}", table, def.name),
                    ));
                }
                AnyKind::Sqlite => steps.extend(rebuild_column_sqlite(table, &def)),
            }
        }

        let was_unique = old_call.has_modifier("unique");
        let is_unique = call.has_modifier("unique");
        if was_unique && !is_unique {
            steps.push(drop_index_step(kind, table, &def.name, true));
        } else if !was_unique && is_unique {
            steps.push(create_index_step(kind, table, &def.name, true));
        }

        let was_indexed = old_call.has_modifier("index");
        let is_indexed = call.has_modifier("index");
        if was_indexed && !is_indexed {
            steps.push(drop_index_step(kind, table, &def.name, false));
        } else if !was_indexed && is_indexed {
            steps.push(create_index_step(kind, table, &def.name, false));
        }
    }
    Ok(steps)
}

fn alter_column_postgres(table: &str, old: &ColumnDef, def: &ColumnDef) -> Vec<SqlStep> {
    let mut steps = Vec::new();
    let what = format!("Altering column {}.{}", table, def.name);
    let prefix = |sql: &mut SqlWriter| {
        sql.write_str("ALTER TABLE ");
        sql.write_name(table);
        sql.write_str(" ALTER COLUMN ");
        sql.write_name(&def.name);
    };

    if old.sql_type != def.sql_type {
        let mut sql = SqlWriter::new(AnyKind::Postgres);
        prefix(&mut sql);
        write!(sql, " TYPE {} USING ", def.sql_type);
        sql.write_name(&def.name);
        write!(sql, "::{}", def.sql_type);
        steps.push(SqlStep::new(sql.build(), what.clone()));
    }
    if old.not_null != def.not_null {
        let mut sql = SqlWriter::new(AnyKind::Postgres);
        prefix(&mut sql);
        sql.write_str(if def.not_null { " SET NOT NULL" } else { " DROP NOT NULL" });
        steps.push(SqlStep::new(sql.build(), what.clone()));
    }
    if old.default != def.default {
        let mut sql = SqlWriter::new(AnyKind::Postgres);
        prefix(&mut sql);
        match &def.default {
            Some(value) => {
                sql.write_str(" SET DEFAULT ");
                write_literal(&mut sql, value);
            }
            None => sql.write_str(" DROP DEFAULT"),
        }
        steps.push(SqlStep::new(sql.build(), what));
    }
    steps
}

/// SQLite cannot alter a column in place, so the column is rebuilt: add a
/// temporary column with the new definition, copy the data over, drop the old
/// column and rename the temporary one into its place.
fn rebuild_column_sqlite(table: &str, def: &ColumnDef) -> Vec<SqlStep> {
    let kind = AnyKind::Sqlite;
    let tmp = format!("__tmp__{}", def.name);
    let what = format!("Altering column {}.{}", table, def.name);

    let mut add = SqlWriter::new(kind);
    add.write_str("ALTER TABLE ");
    add.write_name(table);
    add.write_str(" ADD COLUMN ");
    // NOT NULL would reject existing rows before the copy runs
    let tmp_def = ColumnDef { name: tmp.clone(), not_null: false, ..clone_def(def) };
    tmp_def.render(&mut add);

    let mut copy = SqlWriter::new(kind);
    copy.write_str("UPDATE ");
    copy.write_name(table);
    copy.write_str(" SET ");
    copy.write_name(&tmp);
    copy.write_str(" = ");
    copy.write_name(&def.name);

    let mut drop = SqlWriter::new(kind);
    drop.write_str("ALTER TABLE ");
    drop.write_name(table);
    drop.write_str(" DROP COLUMN ");
    drop.write_name(&def.name);

    let mut rename = SqlWriter::new(kind);
    rename.write_str("ALTER TABLE ");
    rename.write_name(table);
    rename.write_str(" RENAME COLUMN ");
    rename.write_name(&tmp);
    rename.write_str(" TO ");
    rename.write_name(&def.name);

    vec![
        SqlStep::new(add.build(), what.clone()),
        SqlStep::new(copy.build(), what.clone()),
        SqlStep::new(drop.build(), what.clone()),
        SqlStep::new(rename.build(), what),
    ]
}

fn clone_def(def: &ColumnDef) -> ColumnDef {
    ColumnDef {
        name: def.name.clone(),
        sql_type: def.sql_type.clone(),
        not_null: def.not_null,
        unsigned: def.unsigned,
        default: def.default.clone(),
    }
}

pub(super) fn rename_column_step(
    kind: AnyKind,
    table: &str,
    from: &str,
    to: &str,
    def: &ColumnDef,
) -> SqlStep {
    let mut sql = SqlWriter::new(kind);
    sql.write_str("ALTER TABLE ");
    sql.write_name(table);
    match kind {
        // MySQL renames by redeclaring the full definition
        AnyKind::MySql => {
            sql.write_str(" CHANGE COLUMN ");
            sql.write_name(from);
            sql.write_str(" ");
            def.render(&mut sql);
        }
        _ => {
            sql.write_str(" RENAME COLUMN ");
            sql.write_name(from);
            sql.write_str(" TO ");
            sql.write_name(to);
        }
    }
    SqlStep::new(sql.build(), format!("Renaming column {}.{} to {}", table, from, to))
}

pub(super) fn lower_field_rename(
    kind: AnyKind,
    table: &str,
    before: &FieldSpec,
    field: &FieldSpec,
) -> Result<Vec<SqlStep>> {
    ensure!(
        before.column_spec.len() == field.column_spec.len(),
        "field {:?} changed its column count inside a rename",
        field.name,
    );

    let mut steps = Vec::new();
    for (old_call, call) in before.column_spec.iter().zip(&field.column_spec) {
        let old = column_def(kind, old_call)?;
        let def = column_def(kind, call)?;
        if old.name != def.name {
            steps.push(rename_column_step(kind, table, &old.name, &def.name, &def));
        }
    }
    Ok(steps)
}

pub(super) fn lower_field_remove(
    kind: AnyKind,
    table: &str,
    field: &FieldSpec,
) -> Result<Vec<SqlStep>> {
    let mut steps = Vec::new();
    for call in &field.column_spec {
        let column = call
            .column_name()
            .with_context(|| format!("column call {:?} has no column name", call.method))?;

        // SQLite refuses to drop a column an index still covers.
        if kind == AnyKind::Sqlite {
            if call.has_modifier("unique") {
                steps.push(drop_index_step(kind, table, column, true));
            }
            if call.has_modifier("index") {
                steps.push(drop_index_step(kind, table, column, false));
            }
        }

        let mut sql = SqlWriter::new(kind);
        sql.write_str("ALTER TABLE ");
        sql.write_name(table);
        sql.write_str(" DROP COLUMN ");
        sql.write_name(column);
        steps.push(SqlStep::new(
            sql.build(),
            format!("Dropping column {}.{}", table, column),
        ));
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use remold_snapshot::schema::{FieldType, Modifier};
    use serde_json::json;
    use super::*;

    fn call(method: &str, column: &str) -> ColumnCall {
        ColumnCall::new(method, vec![json!(column)])
    }

    fn with_modifier(mut call: ColumnCall, name: &str, args: Vec<serde_json::Value>) -> ColumnCall {
        call.modifiers.push(Modifier { name: name.into(), args });
        call
    }

    fn field(name: &str, calls: Vec<ColumnCall>) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            type_: FieldType::Scalar("Text".into()),
            options: Default::default(),
            column_spec: calls,
            assoc: None,
        }
    }

    #[test]
    fn create_table_with_modifiers() {
        let fields = vec![
            field("id", vec![call("increments", "id")]),
            field(
                "name",
                vec![with_modifier(
                    with_modifier(call("string", "name"), "notNullable", vec![]),
                    "defaultTo",
                    vec![json!("untitled")],
                )],
            ),
        ];
        let steps =
            lower_list_create(AnyKind::Sqlite, "Todo", &ListOptions::default(), &fields).unwrap();
        assert_eq!(
            steps[0].sql,
            r#"CREATE TABLE "Todo" ("id" INTEGER PRIMARY KEY AUTOINCREMENT, "name" VARCHAR(255) NOT NULL DEFAULT 'untitled')"#,
        );
    }

    #[test]
    fn unique_becomes_a_named_index_statement() {
        let fields = vec![
            field("id", vec![call("increments", "id")]),
            field("email", vec![with_modifier(call("string", "email"), "unique", vec![])]),
        ];
        let steps = lower_list_create(AnyKind::Postgres, "User", &ListOptions::default(), &fields)
            .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(
            steps[1].sql,
            r#"CREATE UNIQUE INDEX "User_email_unique" ON "User" ("email")"#,
        );
    }

    #[test]
    fn table_name_override_wins() {
        let fields = vec![field("id", vec![call("increments", "id")])];
        let options = ListOptions { table_name: Some("todo_items".into()) };
        let steps = lower_list_create(AnyKind::Postgres, "Todo", &options, &fields).unwrap();
        assert!(steps[0].sql.starts_with(r#"CREATE TABLE "todo_items""#));
    }

    #[test]
    fn sqlite_update_rebuilds_the_column() {
        let before = field("name", vec![call("text", "name")]);
        let after = field(
            "name",
            vec![with_modifier(call("string", "name"), "notNullable", vec![])],
        );
        let steps = lower_field_update(AnyKind::Sqlite, "Todo", &before, &after).unwrap();
        let sql: Vec<_> = steps.iter().map(|s| s.sql.as_str()).collect();
        assert_eq!(
            sql,
            vec![
                r#"ALTER TABLE "Todo" ADD COLUMN "__tmp__name" VARCHAR(255)"#,
                r#"UPDATE "Todo" SET "__tmp__name" = "name""#,
                r#"ALTER TABLE "Todo" DROP COLUMN "name""#,
                r#"ALTER TABLE "Todo" RENAME COLUMN "__tmp__name" TO "name""#,
            ],
        );
    }

    #[test]
    fn postgres_update_alters_in_place() {
        let before = field("name", vec![call("text", "name")]);
        let after = field(
            "name",
            vec![with_modifier(call("string", "name"), "notNullable", vec![])],
        );
        let steps = lower_field_update(AnyKind::Postgres, "Todo", &before, &after).unwrap();
        let sql: Vec<_> = steps.iter().map(|s| s.sql.as_str()).collect();
        assert_eq!(
            sql,
            vec![
                r#"ALTER TABLE "Todo" ALTER COLUMN "name" TYPE VARCHAR(255) USING "name"::VARCHAR(255)"#,
                r#"ALTER TABLE "Todo" ALTER COLUMN "name" SET NOT NULL"#,
            ],
        );
    }

    #[test]
    fn mysql_rename_redeclares_the_definition() {
        let before = field("title", vec![call("string", "title")]);
        let after = field("name", vec![call("string", "name")]);
        let steps = lower_field_rename(AnyKind::MySql, "Todo", &before, &after).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(
            steps[0].sql,
            "ALTER TABLE `Todo` CHANGE COLUMN `title` `name` VARCHAR(255)",
        );
    }

    #[test]
    fn unknown_column_method_is_an_error() {
        let fields = vec![field("x", vec![call("geography", "x")])];
        let err = lower_list_create(AnyKind::Postgres, "Todo", &ListOptions::default(), &fields)
            .unwrap_err();
        assert!(err.to_string().contains("geography"));
    }

    #[test]
    fn remove_drops_indexes_first_on_sqlite() {
        let target = field(
            "email",
            vec![with_modifier(call("string", "email"), "unique", vec![])],
        );
        let steps = lower_field_remove(AnyKind::Sqlite, "User", &target).unwrap();
        let sql: Vec<_> = steps.iter().map(|s| s.sql.as_str()).collect();
        assert_eq!(
            sql,
            vec![
                r#"DROP INDEX IF EXISTS "User_email_unique""#,
                r#"ALTER TABLE "User" DROP COLUMN "email""#,
            ],
        );
    }
}
