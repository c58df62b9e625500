use remold_snapshot::schema;
use serde::{Deserialize, Serialize};

/// A single structural operation derived from a schema diff.
///
/// Created only by the builder, consumed only by the executor; the wire form
/// is a flat `{object, op, name, ...}` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    pub name: String,
    #[serde(flatten)]
    pub kind: MigrationKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "camelCase")]
pub enum MigrationKind {
    List(ListOp),
    Field(FieldOp),
    Association(AssociationOp),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ListOp {
    Create {
        options: schema::ListOptions,
        fields: Vec<schema::FieldSpec>,
    },
    Remove {
        options: schema::ListOptions,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum FieldOp {
    Create {
        list: String,
        field: schema::FieldSpec,
    },
    Update {
        list: String,
        field: schema::FieldSpec,
        before: schema::FieldSpec,
    },
    Rename {
        list: String,
        field: schema::FieldSpec,
        before: schema::FieldSpec,
    },
    Remove {
        list: String,
        field: schema::FieldSpec,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum AssociationOp {
    Create {
        assoc: schema::AssociationSpec,
    },
    Update {
        assoc: schema::AssociationSpec,
        before: schema::AssociationSpec,
    },
    Rename {
        assoc: schema::AssociationSpec,
        before: schema::AssociationSpec,
    },
    Remove {
        assoc: schema::AssociationSpec,
    },
}

impl AssociationOp {
    pub fn assoc(&self) -> &schema::AssociationSpec {
        match self {
            AssociationOp::Create { assoc }
            | AssociationOp::Update { assoc, .. }
            | AssociationOp::Rename { assoc, .. }
            | AssociationOp::Remove { assoc } => assoc,
        }
    }

    pub fn before(&self) -> Option<&schema::AssociationSpec> {
        match self {
            AssociationOp::Update { before, .. } | AssociationOp::Rename { before, .. } => {
                Some(before)
            }
            _ => None,
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, AssociationOp::Update { .. })
    }
}

impl Migration {
    pub fn object_name(&self) -> &'static str {
        match self.kind {
            MigrationKind::List(_) => "list",
            MigrationKind::Field(_) => "field",
            MigrationKind::Association(_) => "association",
        }
    }

    pub fn op_name(&self) -> &'static str {
        match &self.kind {
            MigrationKind::List(ListOp::Create { .. })
            | MigrationKind::Field(FieldOp::Create { .. })
            | MigrationKind::Association(AssociationOp::Create { .. }) => "create",
            MigrationKind::Field(FieldOp::Update { .. })
            | MigrationKind::Association(AssociationOp::Update { .. }) => "update",
            MigrationKind::Field(FieldOp::Rename { .. })
            | MigrationKind::Association(AssociationOp::Rename { .. }) => "rename",
            MigrationKind::List(ListOp::Remove { .. })
            | MigrationKind::Field(FieldOp::Remove { .. })
            | MigrationKind::Association(AssociationOp::Remove { .. }) => "remove",
        }
    }

    /// One-line human description, used for plan previews.
    pub fn describe(&self) -> String {
        match &self.kind {
            MigrationKind::Field(op) => {
                let list = match op {
                    FieldOp::Create { list, .. }
                    | FieldOp::Update { list, .. }
                    | FieldOp::Rename { list, .. }
                    | FieldOp::Remove { list, .. } => list,
                };
                format!("field {} {}.{}", self.op_name(), list, self.name)
            }
            MigrationKind::Association(op) => {
                let assoc = op.assoc();
                format!(
                    "association {} {}.{} -> {}",
                    self.op_name(),
                    assoc.left.list,
                    assoc.left.field,
                    assoc.right.list,
                )
            }
            MigrationKind::List(_) => format!("list {} {}", self.op_name(), self.name),
        }
    }

    /// Execution priority: tables before columns before relationship
    /// structure, construction before mutation before removal. A list drop is
    /// scheduled after every association drop so foreign keys and pivot
    /// tables go away before the tables they reference.
    pub fn priority(&self) -> u8 {
        match &self.kind {
            MigrationKind::List(ListOp::Create { .. }) => 0,
            MigrationKind::Field(FieldOp::Create { .. }) => 10,
            MigrationKind::Field(FieldOp::Update { .. }) => 11,
            MigrationKind::Field(FieldOp::Rename { .. }) => 12,
            MigrationKind::Field(FieldOp::Remove { .. }) => 13,
            MigrationKind::Association(AssociationOp::Create { .. }) => 20,
            MigrationKind::Association(AssociationOp::Update { .. }) => 21,
            MigrationKind::Association(AssociationOp::Rename { .. }) => 22,
            MigrationKind::Association(AssociationOp::Remove { .. }) => 23,
            MigrationKind::List(ListOp::Remove { .. }) => 30,
        }
    }
}

/// Sorts migrations into execution order. The sort is stable, so operations
/// with equal priority keep the order the builder emitted them in.
pub fn sort_migrations(migrations: &mut [Migration]) {
    migrations.sort_by_key(Migration::priority);
}

/// The unit exchanged between builder and executor, and the unit an external
/// CLI persists between a "create" run and an "apply" run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub migrations: Vec<Migration>,
    /// The schema the database will match once the plan is applied; persisted
    /// as the new snapshot.
    pub schema: schema::SchemaSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<PlanCmd>,
    /// Snapshot row the command operates on: the row to deactivate for a
    /// rollback, the row to reactivate for a forward.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlanCmd {
    Rollback,
    Forward,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use remold_snapshot::schema::{
        AssociationSpec, Cardinality, FieldSpec, FieldType, ListOptions, SideRef, TargetRef,
    };
    use super::*;

    fn list_create(name: &str) -> Migration {
        Migration {
            name: name.into(),
            kind: MigrationKind::List(ListOp::Create {
                options: ListOptions::default(),
                fields: Vec::new(),
            }),
        }
    }

    fn list_remove(name: &str) -> Migration {
        Migration {
            name: name.into(),
            kind: MigrationKind::List(ListOp::Remove { options: ListOptions::default() }),
        }
    }

    fn field_create(list: &str, name: &str) -> Migration {
        Migration {
            name: name.into(),
            kind: MigrationKind::Field(FieldOp::Create {
                list: list.into(),
                field: FieldSpec {
                    name: name.into(),
                    type_: FieldType::Scalar("Text".into()),
                    options: Default::default(),
                    column_spec: Vec::new(),
                    assoc: None,
                },
            }),
        }
    }

    fn assoc(op: fn(AssociationSpec) -> AssociationOp, list: &str, field: &str) -> Migration {
        Migration {
            name: list.into(),
            kind: MigrationKind::Association(op(AssociationSpec {
                cardinality: Cardinality::ManyToOne,
                left: SideRef { list: list.into(), field: field.into() },
                right: TargetRef { list: "Category".into(), field: None },
            })),
        }
    }

    #[test]
    fn tables_come_before_columns_and_associations() {
        let mut migrations = vec![
            assoc(|a| AssociationOp::Create { assoc: a }, "Todo", "category"),
            field_create("Todo", "title"),
            list_create("Todo"),
        ];
        sort_migrations(&mut migrations);
        let order: Vec<_> = migrations
            .iter()
            .map(|m| (m.object_name(), m.op_name()))
            .collect();
        assert_eq!(
            order,
            vec![("list", "create"), ("field", "create"), ("association", "create")],
        );
    }

    #[test]
    fn list_drop_goes_after_association_drop() {
        let mut migrations = vec![
            list_remove("Category"),
            assoc(|a| AssociationOp::Remove { assoc: a }, "Todo", "category"),
        ];
        sort_migrations(&mut migrations);
        assert_eq!(migrations[0].object_name(), "association");
        assert_eq!(migrations[1].object_name(), "list");
    }

    #[test]
    fn wire_format_is_flat() {
        let migration = list_create("Todo");
        let value = serde_json::to_value(&migration).unwrap();
        assert_eq!(value["object"], "list");
        assert_eq!(value["op"], "create");
        assert_eq!(value["name"], "Todo");

        let back: Migration = serde_json::from_value(value).unwrap();
        assert_eq!(back.describe(), "list create Todo");
    }

    #[test]
    fn stable_order_within_equal_priority() {
        let mut migrations = vec![list_create("Category"), list_create("Todo")];
        sort_migrations(&mut migrations);
        assert_eq!(migrations[0].name, "Category");
        assert_eq!(migrations[1].name, "Todo");
    }
}
