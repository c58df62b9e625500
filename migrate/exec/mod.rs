//! Applies a migration plan as DDL/DML against the target database.

use anyhow::{Context, Result};
use sqlx::any::AnyKind;
use sqlx::Executor;
use crate::conn::DbConn;
use crate::migration::{
    AssociationOp, FieldOp, ListOp, Migration, MigrationKind, MigrationPlan, PlanCmd,
    sort_migrations,
};
use crate::report::ProgressReporter;
use crate::store::SnapshotStore;

mod assoc;
mod ddl;
mod transition;

pub use transition::Transition;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("unsupported cardinality transition from {before} to {after}")]
    UnsupportedTransition { before: String, after: String },
}

/// One SQL statement of a lowered migration, with a human description for
/// plan previews and confirmation prompts.
#[derive(Debug, Clone)]
pub struct SqlStep {
    pub sql: String,
    pub what: String,
}

impl SqlStep {
    fn new(sql: String, what: impl Into<String>) -> Self {
        Self { sql, what: what.into() }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExecMode {
    /// Execute every statement.
    Apply,
    /// Ask the reporter before each statement; a declined statement is
    /// skipped, the run continues.
    Ask,
    /// Compute and collect SQL, execute nothing and leave no snapshot.
    DryRun,
}

#[derive(Debug, Copy, Clone)]
pub struct ExecOpts {
    pub mode: ExecMode,
}

impl Default for ExecOpts {
    fn default() -> Self {
        Self { mode: ExecMode::Apply }
    }
}

/// What a run did: every statement's SQL in execution order, and how many of
/// them were actually executed vs skipped by a declined confirmation.
#[derive(Debug, Default)]
pub struct ExecReport {
    pub sql: Vec<String>,
    pub executed: usize,
    pub skipped: usize,
}

pub struct MigrationExecutor<'a> {
    conn: &'a DbConn,
    store: &'a SnapshotStore,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(
        conn: &'a DbConn,
        store: &'a SnapshotStore,
        reporter: &'a dyn ProgressReporter,
    ) -> Self {
        Self { conn, store, reporter }
    }

    /// Applies the plan in dependency order and persists the schema version
    /// change on success. Statements within one migration run inside one
    /// transaction; there is no cross-migration atomicity, so a failed batch
    /// leaves earlier migrations applied and the snapshot untouched, and a
    /// retried run re-diffs against the pre-migration snapshot.
    pub async fn apply(&self, plan: &MigrationPlan, opts: &ExecOpts) -> Result<ExecReport> {
        let mut migrations = plan.migrations.clone();
        sort_migrations(&mut migrations);
        self.reporter.show_plan(&migrations);

        if migrations.is_empty() && plan.cmd.is_none() {
            return Ok(ExecReport::default());
        }

        let mut report = ExecReport::default();
        for migration in &migrations {
            let steps = self
                .lower(migration)
                .with_context(|| format!("could not lower migration: {}", migration.describe()))?;
            if steps.is_empty() {
                continue;
            }

            if opts.mode == ExecMode::DryRun {
                report.sql.extend(steps.into_iter().map(|step| step.sql));
                continue;
            }

            let mut txn = self.conn.begin().await?;
            for step in steps {
                if opts.mode == ExecMode::Ask {
                    let prompt = format!("{}\n  {}", step.what, step.sql);
                    if !self.reporter.confirm(&prompt) {
                        report.skipped += 1;
                        continue;
                    }
                }
                self.reporter.info(&step.what);
                log::debug!("executing: {}", step.sql);
                txn.execute(step.sql.as_str())
                    .await
                    .with_context(|| format!("could not execute SQL statement {:?}", step.sql))?;
                report.executed += 1;
                report.sql.push(step.sql);
            }
            txn.commit()
                .await
                .with_context(|| format!("could not commit: {}", migration.describe()))?;
        }

        if opts.mode != ExecMode::DryRun {
            self.finish(plan).await?;
        }
        Ok(report)
    }

    /// Lowers one migration into its SQL statements for the connected
    /// database, without executing anything.
    pub fn lower(&self, migration: &Migration) -> Result<Vec<SqlStep>> {
        lower_migration(self.conn.kind(), migration, self.reporter)
    }

    async fn finish(&self, plan: &MigrationPlan) -> Result<()> {
        match plan.cmd {
            None => {
                self.store.save(&plan.schema, true).await?;
                // a fresh forward-going version invalidates the old
                // rollback/forward stack
                self.store.purge_inactive().await?;
            }
            Some(PlanCmd::Rollback) => {
                let id = plan.id.context("rollback plan carries no snapshot id")?;
                self.store.set_active(id, false).await?;
            }
            Some(PlanCmd::Forward) => {
                let id = plan.id.context("forward plan carries no snapshot id")?;
                self.store.set_active(id, true).await?;
            }
        }
        Ok(())
    }
}

fn lower_migration(
    kind: AnyKind,
    migration: &Migration,
    reporter: &dyn ProgressReporter,
) -> Result<Vec<SqlStep>> {
    match &migration.kind {
        MigrationKind::List(ListOp::Create { options, fields }) => {
            ddl::lower_list_create(kind, &migration.name, options, fields)
        }
        MigrationKind::List(ListOp::Remove { options }) => {
            Ok(ddl::lower_list_remove(kind, &migration.name, options))
        }
        MigrationKind::Field(FieldOp::Create { list, field }) => {
            ddl::lower_field_create(kind, list, field)
        }
        MigrationKind::Field(FieldOp::Update { list, field, before }) => {
            ddl::lower_field_update(kind, list, before, field)
        }
        MigrationKind::Field(FieldOp::Rename { list, field, before }) => {
            ddl::lower_field_rename(kind, list, before, field)
        }
        MigrationKind::Field(FieldOp::Remove { list, field }) => {
            ddl::lower_field_remove(kind, list, field)
        }
        MigrationKind::Association(AssociationOp::Create { assoc }) => {
            assoc::lower_create(kind, assoc)
        }
        MigrationKind::Association(AssociationOp::Remove { assoc }) => {
            assoc::lower_remove(kind, assoc)
        }
        MigrationKind::Association(AssociationOp::Rename { assoc, before }) => {
            assoc::lower_rename(kind, before, assoc)
        }
        MigrationKind::Association(AssociationOp::Update { assoc, before }) => {
            transition::lower_update(kind, before, assoc, reporter)
        }
    }
}
