use anyhow::{Context, Result};
use sqlx::any::{AnyConnectOptions, AnyKind, AnyPool, AnyPoolOptions};
use std::str::FromStr;

/// Database connection shared by every component of a migration run.
///
/// A run operates through exactly one handle: DDL ordering and per-operation
/// transactional scope depend on it, so no component opens a second
/// connection of its own.
#[derive(Debug, Clone)]
pub struct DbConn {
    pub pool: AnyPool,
    kind: AnyKind,
}

impl DbConn {
    pub fn new(pool: AnyPool, kind: AnyKind) -> Self {
        Self { pool, kind }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let opts = AnyConnectOptions::from_str(url).context("invalid database url")?;
        let kind = opts.kind();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .context("could not connect to the database")?;
        Ok(Self::new(pool, kind))
    }

    pub fn kind(&self) -> AnyKind {
        self.kind
    }

    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Any>> {
        self.pool.begin().await.context("could not begin a transaction")
    }
}
