//! Turns schema diffs into an ordered migration plan.

use anyhow::Result;
use remold_snapshot::schema;
use std::collections::HashMap;
use crate::diff;
use crate::migration::{
    AssociationOp, FieldOp, ListOp, Migration, MigrationKind, MigrationPlan, PlanCmd,
};
use crate::report::ProgressReporter;
use crate::store::SnapshotStore;

pub struct MigrationBuilder<'a> {
    store: &'a SnapshotStore,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> MigrationBuilder<'a> {
    pub fn new(store: &'a SnapshotStore, reporter: &'a dyn ProgressReporter) -> Self {
        Self { store, reporter }
    }

    /// Normal forward migration: diff the current model against the latest
    /// active snapshot.
    pub async fn build(&self, current: &schema::SchemaSnapshot) -> Result<MigrationPlan> {
        let baseline = self.store.load_active(0).await?;
        let migrations = plan_migrations(baseline.as_ref().map(|row| &row.content), current);
        if migrations.is_empty() {
            self.reporter.info("schema up to date, nothing to migrate");
        }
        Ok(MigrationPlan { migrations, schema: current.clone(), cmd: None, id: None })
    }

    /// First migration against a fresh database: every list is a create.
    pub async fn build_initial(&self, current: &schema::SchemaSnapshot) -> Result<MigrationPlan> {
        let migrations = plan_migrations(None, current);
        Ok(MigrationPlan { migrations, schema: current.clone(), cmd: None, id: None })
    }

    /// Rollback: diff the latest active snapshot against the one before it.
    /// The plan carries the id of the latest snapshot so the executor can
    /// deactivate it afterwards.
    pub async fn build_rollback(&self) -> Result<MigrationPlan> {
        let latest = match self.store.load_active(0).await? {
            Some(row) => row,
            None => {
                self.reporter.warn("no applied schema version, nothing to roll back");
                return Ok(empty_plan());
            }
        };
        let previous = match self.store.load_active(1).await? {
            Some(row) => row,
            None => {
                self.reporter.warn("already at the oldest schema version, nothing to roll back");
                return Ok(empty_plan());
            }
        };

        let migrations = plan_migrations(Some(&latest.content), &previous.content);
        Ok(MigrationPlan {
            migrations,
            schema: previous.content,
            cmd: Some(PlanCmd::Rollback),
            id: Some(latest.id),
        })
    }

    /// Forward after a rollback: diff the latest active snapshot against the
    /// earliest inactive one, which gets reactivated afterwards.
    pub async fn build_forward(&self) -> Result<MigrationPlan> {
        let target = match self.store.load_inactive(0).await? {
            Some(row) => row,
            None => {
                self.reporter.warn("no rolled-back schema version, nothing to move forward to");
                return Ok(empty_plan());
            }
        };
        let baseline = self.store.load_active(0).await?;

        let migrations =
            plan_migrations(baseline.as_ref().map(|row| &row.content), &target.content);
        Ok(MigrationPlan {
            migrations,
            schema: target.content,
            cmd: Some(PlanCmd::Forward),
            id: Some(target.id),
        })
    }
}

fn empty_plan() -> MigrationPlan {
    MigrationPlan {
        migrations: Vec::new(),
        schema: schema::SchemaSnapshot::default(),
        cmd: None,
        id: None,
    }
}

/// Diffs two snapshots list by list and emits the flat migration list, with
/// duplicate association operations already resolved. `source` of `None`
/// means a fresh database: everything is a create.
pub(crate) fn plan_migrations(
    source: Option<&schema::SchemaSnapshot>,
    target: &schema::SchemaSnapshot,
) -> Vec<Migration> {
    let mut raw = Vec::new();

    for list in target.lists.values() {
        match source.and_then(|src| src.lists.get(&list.name)) {
            None => plan_list_create(list, &mut raw),
            Some(cached) => plan_list_update(cached, list, &mut raw),
        }
    }

    if let Some(source) = source {
        for cached in source.lists.values() {
            if !target.lists.contains_key(&cached.name) {
                plan_list_remove(cached, &mut raw);
            }
        }
    }

    resolve_duplicate_associations(raw)
}

fn plan_list_create(list: &schema::ListSpec, out: &mut Vec<Migration>) {
    out.push(Migration {
        name: list.name.clone(),
        kind: MigrationKind::List(ListOp::Create {
            options: list.options.clone(),
            fields: list.fields.values().cloned().collect(),
        }),
    });

    for field in list.fields.values() {
        if let Some(assoc) = &field.assoc {
            out.push(association_migration(AssociationOp::Create { assoc: assoc.clone() }));
        }
    }
}

fn plan_list_remove(list: &schema::ListSpec, out: &mut Vec<Migration>) {
    // Foreign keys and pivot tables first; the sort keeps the table drop
    // after them.
    for field in list.fields.values() {
        if let Some(assoc) = &field.assoc {
            out.push(association_migration(AssociationOp::Remove { assoc: assoc.clone() }));
        }
    }

    out.push(Migration {
        name: list.name.clone(),
        kind: MigrationKind::List(ListOp::Remove { options: list.options.clone() }),
    });
}

fn plan_list_update(
    cached: &schema::ListSpec,
    current: &schema::ListSpec,
    out: &mut Vec<Migration>,
) {
    let diff = diff::diff_list_fields(cached, current);

    for field in diff.add {
        match &field.assoc {
            Some(assoc) => {
                out.push(association_migration(AssociationOp::Create { assoc: assoc.clone() }))
            }
            None => out.push(Migration {
                name: field.name.clone(),
                kind: MigrationKind::Field(FieldOp::Create { list: current.name.clone(), field }),
            }),
        }
    }

    for change in diff.update {
        match (&change.source.assoc, &change.target.assoc) {
            (Some(before), Some(assoc)) => out.push(association_migration(
                AssociationOp::Update { assoc: assoc.clone(), before: before.clone() },
            )),
            _ => out.push(Migration {
                name: change.target.name.clone(),
                kind: MigrationKind::Field(FieldOp::Update {
                    list: current.name.clone(),
                    field: change.target,
                    before: change.source,
                }),
            }),
        }
    }

    for change in diff.rename {
        match (&change.source.assoc, &change.target.assoc) {
            (Some(before), Some(assoc)) => out.push(association_migration(
                AssociationOp::Rename { assoc: assoc.clone(), before: before.clone() },
            )),
            _ => out.push(Migration {
                name: change.target.name.clone(),
                kind: MigrationKind::Field(FieldOp::Rename {
                    list: current.name.clone(),
                    field: change.target,
                    before: change.source,
                }),
            }),
        }
    }

    for field in diff.remove {
        match &field.assoc {
            Some(assoc) => {
                out.push(association_migration(AssociationOp::Remove { assoc: assoc.clone() }))
            }
            None => out.push(Migration {
                name: field.name.clone(),
                kind: MigrationKind::Field(FieldOp::Remove { list: current.name.clone(), field }),
            }),
        }
    }
}

fn association_migration(op: AssociationOp) -> Migration {
    Migration {
        name: op.assoc().left.list.clone(),
        kind: MigrationKind::Association(op),
    }
}

/// A referenced relationship is declared on both lists, so the per-list diff
/// emits its change twice. This pass keeps exactly one migration per logical
/// relationship: an update displaces a non-update recorded for the same pair
/// (the update carries the authoritative before/after cardinality a create or
/// remove would lose), and between two updates the structure-owning side wins
/// regardless of list declaration order.
fn resolve_duplicate_associations(raw: Vec<Migration>) -> Vec<Migration> {
    let mut out: Vec<Migration> = Vec::with_capacity(raw.len());
    let mut seen: HashMap<(String, String), usize> = HashMap::new();

    for migration in raw {
        let op = match &migration.kind {
            MigrationKind::Association(op) => op,
            _ => {
                out.push(migration);
                continue;
            }
        };
        let assoc = op.assoc();

        if let Some(reciprocal) = &assoc.right.field {
            let reciprocal_key = (assoc.right.list.clone(), reciprocal.clone());
            if let Some(&pos) = seen.get(&reciprocal_key) {
                let displace = match &out[pos].kind {
                    MigrationKind::Association(existing) => {
                        match (op.is_update(), existing.is_update()) {
                            (true, false) => true,
                            (false, _) => false,
                            (true, true) => owning_side_wins(op, existing),
                        }
                    }
                    _ => false,
                };
                if displace {
                    out[pos] = migration;
                }
                continue;
            }
        }

        let key = (assoc.left.list.clone(), assoc.left.field.clone());
        seen.insert(key, out.len());
        out.push(migration);
    }

    out
}

/// True when the declaring side of `spec` physically carries the structure:
/// its list holds the foreign key column.
fn owns_structure(spec: &schema::AssociationSpec) -> bool {
    match spec.cardinality {
        schema::Cardinality::ManyToOne => true,
        schema::Cardinality::OneToOne => spec.referenced(),
        _ => false,
    }
}

/// Picks the surviving side of a bidirectional update. The side that owns the
/// structure before the change wins, then the side that owns it after; a full
/// tie falls back to the smaller (list, field) pair so the outcome never
/// depends on list declaration order.
fn owning_side_wins(candidate: &AssociationOp, existing: &AssociationOp) -> bool {
    let rank = |op: &AssociationOp| {
        (
            op.before().map(owns_structure).unwrap_or(false),
            owns_structure(op.assoc()),
        )
    };
    let (c, e) = (rank(candidate), rank(existing));
    if c != e {
        return c > e;
    }
    fn key(op: &AssociationOp) -> (&String, &String) {
        (&op.assoc().left.list, &op.assoc().left.field)
    }
    key(candidate) < key(existing)
}
