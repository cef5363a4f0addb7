//! SQLite access layer: connection setup, schema, and record stores.

pub mod tasks;
pub mod tenants;

pub use tasks::{Task, TaskStatus, TaskStore};
pub use tenants::{ChannelCredentials, TenantProfile, TenantStore};

use crate::error::{DbError, Result};
use anyhow::Context as _;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;

/// Open (creating if needed) the shopbot database and apply the schema.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(DbError::SqliteConnect)?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// Apply the schema. Idempotent; every statement is CREATE IF NOT EXISTS.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            task_id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id TEXT NOT NULL,
            channel_user_id TEXT NOT NULL,
            user_message TEXT NOT NULL,
            agent_response TEXT,
            trace TEXT,
            operator_response TEXT,
            reply_token TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Pending',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            response_timestamp TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create tasks table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tasks_tenant_status ON tasks (tenant_id, status)",
    )
    .execute(pool)
    .await
    .context("failed to create tasks index")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            tenant_id TEXT PRIMARY KEY,
            store_name TEXT,
            is_auto_reply_enabled INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create tenants table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS channel_credentials (
            tenant_id TEXT PRIMARY KEY,
            channel_secret TEXT NOT NULL,
            channel_access_token TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create channel_credentials table")?;

    Ok(())
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    // sqlite runs on its own worker threads, which tokio's paused test clock
    // does not know about: under `start_paused` the runtime auto-advances
    // past the pool's acquire timeout whenever it parks while sqlite work is
    // in flight. Keep the scheduler busy during setup, then keep a watcher
    // task spinning whenever the pool's one connection is checked out or
    // being returned, so the clock can only advance while the pool is idle.
    let setup = async {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .test_before_acquire(false)
            .max_lifetime(None)
            .idle_timeout(None)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        init_schema(&pool).await.expect("schema should apply");
        pool
    };
    tokio::pin!(setup);
    let pool = loop {
        tokio::select! {
            biased;
            pool = &mut setup => break pool,
            _ = tokio::task::yield_now() => {}
        }
    };

    let watched = pool.clone();
    tokio::spawn(async move {
        loop {
            if watched.num_idle() == 0 {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        }
    });

    pool
}
