//! Versioned schema-snapshot store.
//!
//! Snapshots live in a dedicated history table (`id`, `content`,
//! `createdAt`, `active`), one row per applied migration batch. Active rows
//! are the applied history, newest first; inactive rows are the "future"
//! stack a rollback leaves behind and a forward re-enters, oldest first.

use anyhow::{Context, Result};
use remold_snapshot::schema;
use sqlx::any::AnyKind;
use sqlx::Row;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use crate::conn::DbConn;
use crate::sql_writer::SqlWriter;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(
        "schema history table {table:?} does not exist; \
         provision it before migrating, for example:\n{ddl}"
    )]
    HistoryNotConfigured { table: String, ddl: String },
}

#[derive(Debug, Clone)]
pub struct StoreOpts {
    pub history_table: String,
    /// Skip the history table entirely: every lookup reports no baseline, so
    /// diffing proceeds as if the database were fresh.
    pub ignore_history: bool,
}

impl Default for StoreOpts {
    fn default() -> Self {
        Self { history_table: "InternalSchema".into(), ignore_history: false }
    }
}

/// One persisted schema version.
#[derive(Debug)]
pub struct SnapshotRow {
    pub id: i64,
    pub content: schema::SchemaSnapshot,
    pub created_at: String,
    pub active: bool,
}

pub struct SnapshotStore {
    conn: DbConn,
    opts: StoreOpts,
}

impl SnapshotStore {
    pub fn new(conn: DbConn, opts: StoreOpts) -> Self {
        Self { conn, opts }
    }

    pub fn history_table(&self) -> &str {
        &self.opts.history_table
    }

    /// Creates the history table when it does not exist yet.
    pub async fn provision(&self) -> Result<()> {
        let sql = bootstrap_ddl(self.conn.kind(), &self.opts.history_table);
        sqlx::query(&sql)
            .execute(&self.conn.pool)
            .await
            .context("could not provision the schema history table")?;
        Ok(())
    }

    /// Fails with [`StoreError::HistoryNotConfigured`] when history is
    /// enabled but the table is missing.
    pub async fn ensure_ready(&self) -> Result<()> {
        self.history_available().await?;
        Ok(())
    }

    /// Loads the `offset`-th most recent active snapshot (0 = latest).
    pub async fn load_active(&self, offset: u32) -> Result<Option<SnapshotRow>> {
        if !self.history_available().await? {
            return Ok(None);
        }
        self.load_one(true, offset).await
    }

    /// Loads the `offset`-th oldest inactive snapshot (0 = the next version
    /// a forward would re-enter).
    pub async fn load_inactive(&self, offset: u32) -> Result<Option<SnapshotRow>> {
        if !self.history_available().await? {
            return Ok(None);
        }
        self.load_one(false, offset).await
    }

    /// Persists a snapshot and returns its row id.
    pub async fn save(&self, snapshot: &schema::SchemaSnapshot, active: bool) -> Result<i64> {
        let content = serde_json::to_string(snapshot).context("could not serialize snapshot")?;
        let created_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .context("could not format snapshot timestamp")?;

        let mut sql = SqlWriter::new(self.conn.kind());
        sql.write_str("INSERT INTO ");
        sql.write_name(&self.opts.history_table);
        sql.write_str(" (");
        sql.write_name("content");
        sql.write_str(", ");
        sql.write_name("createdAt");
        sql.write_str(", ");
        sql.write_name("active");
        sql.write_str(") VALUES (");
        sql.write_param(0);
        sql.write_str(", ");
        sql.write_param(1);
        sql.write_str(", ");
        sql.write_param(2);
        sql.write_str(")");

        if self.conn.kind() == AnyKind::Postgres {
            sql.write_str(" RETURNING ");
            sql.write_name("id");
            let sql = sql.build();
            let row = sqlx::query(&sql)
                .bind(&content)
                .bind(&created_at)
                .bind(active)
                .fetch_one(&self.conn.pool)
                .await
                .context("could not save snapshot")?;
            Ok(row.try_get::<i64, _>(0)?)
        } else {
            let sql = sql.build();
            let result = sqlx::query(&sql)
                .bind(&content)
                .bind(&created_at)
                .bind(active)
                .execute(&self.conn.pool)
                .await
                .context("could not save snapshot")?;
            result
                .last_insert_id()
                .context("database did not report an id for the saved snapshot")
        }
    }

    /// Flips the `active` flag of one snapshot row (rollback deactivates,
    /// forward reactivates).
    pub async fn set_active(&self, id: i64, active: bool) -> Result<()> {
        let mut sql = SqlWriter::new(self.conn.kind());
        sql.write_str("UPDATE ");
        sql.write_name(&self.opts.history_table);
        sql.write_str(" SET ");
        sql.write_name("active");
        sql.write_str(" = ");
        sql.write_param(0);
        sql.write_str(" WHERE ");
        sql.write_name("id");
        sql.write_str(" = ");
        sql.write_param(1);

        let sql = sql.build();
        sqlx::query(&sql)
            .bind(active)
            .bind(id)
            .execute(&self.conn.pool)
            .await
            .with_context(|| format!("could not set snapshot {} active={}", id, active))?;
        Ok(())
    }

    /// Deletes every inactive snapshot. Called after a fresh forward-going
    /// snapshot is saved, which invalidates the old rollback/forward stack.
    pub async fn purge_inactive(&self) -> Result<()> {
        let mut sql = SqlWriter::new(self.conn.kind());
        sql.write_str("DELETE FROM ");
        sql.write_name(&self.opts.history_table);
        sql.write_str(" WHERE ");
        sql.write_name("active");
        sql.write_str(" = FALSE");

        let sql = sql.build();
        sqlx::query(&sql)
            .execute(&self.conn.pool)
            .await
            .context("could not purge inactive snapshots")?;
        Ok(())
    }

    async fn load_one(&self, active: bool, offset: u32) -> Result<Option<SnapshotRow>> {
        let mut sql = SqlWriter::new(self.conn.kind());
        sql.write_str("SELECT ");
        for (i, col) in ["id", "content", "createdAt", "active"].iter().enumerate() {
            if i > 0 {
                sql.write_str(", ");
            }
            sql.write_name(col);
        }
        sql.write_str(" FROM ");
        sql.write_name(&self.opts.history_table);
        sql.write_str(" WHERE ");
        sql.write_name("active");
        sql.write_str(if active { " = TRUE" } else { " = FALSE" });
        sql.write_str(" ORDER BY ");
        sql.write_name("createdAt");
        sql.write_str(if active { " DESC, " } else { " ASC, " });
        sql.write_name("id");
        sql.write_str(if active { " DESC" } else { " ASC" });
        write!(sql, " LIMIT 1 OFFSET {}", offset);

        let sql = sql.build();
        let row = sqlx::query(&sql)
            .fetch_optional(&self.conn.pool)
            .await
            .context("could not load snapshot")?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let content: String = row.try_get("content")?;
        let content = serde_json::from_str(&content)
            .context("could not deserialize cached snapshot")?;
        Ok(Some(SnapshotRow {
            id: row.try_get("id")?,
            content,
            created_at: row.try_get("createdAt")?,
            active: row.try_get("active")?,
        }))
    }

    async fn history_available(&self) -> Result<bool> {
        if self.opts.ignore_history {
            return Ok(false);
        }
        if !self.table_exists().await? {
            return Err(StoreError::HistoryNotConfigured {
                table: self.opts.history_table.clone(),
                ddl: bootstrap_ddl(self.conn.kind(), &self.opts.history_table),
            }
            .into());
        }
        Ok(true)
    }

    async fn table_exists(&self) -> Result<bool> {
        let sql = match self.conn.kind() {
            AnyKind::Sqlite => {
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1"
            }
            AnyKind::Postgres => {
                "SELECT 1 FROM information_schema.tables WHERE table_name = $1"
            }
            AnyKind::MySql => {
                "SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?"
            }
        };
        let row = sqlx::query(sql)
            .bind(&self.opts.history_table)
            .fetch_optional(&self.conn.pool)
            .await
            .context("could not check for the schema history table")?;
        Ok(row.is_some())
    }
}

/// DDL that provisions the history table; also quoted in the
/// `HistoryNotConfigured` error so the caller knows what to create.
fn bootstrap_ddl(kind: AnyKind, table: &str) -> String {
    let id_def = match kind {
        AnyKind::Postgres => "BIGSERIAL PRIMARY KEY",
        AnyKind::MySql => "BIGINT AUTO_INCREMENT PRIMARY KEY",
        AnyKind::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
    };

    let mut sql = SqlWriter::new(kind);
    sql.write_str("CREATE TABLE IF NOT EXISTS ");
    sql.write_name(table);
    sql.write_str(" (");
    sql.write_name("id");
    write!(sql, " {}, ", id_def);
    sql.write_name("content");
    sql.write_str(" TEXT NOT NULL, ");
    sql.write_name("createdAt");
    sql.write_str(" TEXT NOT NULL, ");
    sql.write_name("active");
    sql.write_str(" BOOLEAN NOT NULL DEFAULT TRUE");
    sql.write_str(")");
    sql.build()
}
