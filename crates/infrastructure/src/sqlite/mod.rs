//! 基于SQLite的持久化：周期任务表与领导锁记录

mod leader_lock;
mod schedule_store;

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use taskplane_core::{TaskplaneError, TaskplaneResult};

pub use leader_lock::SqliteLeaderLock;
pub use schedule_store::SqliteScheduleStore;

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS schedule_entries (
        name TEXT PRIMARY KEY,
        task_name TEXT NOT NULL,
        args TEXT NOT NULL,
        cadence TEXT NOT NULL,
        last_run INTEGER,
        next_run INTEGER NOT NULL,
        enabled INTEGER NOT NULL,
        max_retries INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS leader_locks (
        name TEXT PRIMARY KEY,
        holder TEXT NOT NULL,
        token INTEGER NOT NULL,
        expires_at INTEGER NOT NULL
    )
    "#,
];

pub(crate) fn db_error(err: sqlx::Error) -> TaskplaneError {
    TaskplaneError::Database(err.to_string())
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> TaskplaneResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| TaskplaneError::Database(format!("invalid timestamp: {millis}")))
}

/// 连接SQLite并执行建表迁移
pub async fn connect(url: &str) -> TaskplaneResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(db_error)?
        .create_if_missing(true);
    // 内存库每个连接都是独立的数据库，只能使用单连接
    let max_connections = if url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .map_err(db_error)?;

    migrate(&pool).await?;
    info!(url, "SQLite存储已就绪");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> TaskplaneResult<()> {
    for statement in MIGRATIONS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(db_error)?;
    }
    Ok(())
}
