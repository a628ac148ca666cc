use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use taskplane_core::models::Cadence;
use taskplane_core::{ScheduleEntry, ScheduleStore, TaskplaneError, TaskplaneResult};

use super::{db_error, from_millis, to_millis};

/// 周期任务表，以条目名为主键
#[derive(Debug, Clone)]
pub struct SqliteScheduleStore {
    pool: SqlitePool,
}

impl SqliteScheduleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> TaskplaneResult<ScheduleEntry> {
        let args: String = row.try_get("args").map_err(db_error)?;
        let cadence: String = row.try_get("cadence").map_err(db_error)?;
        let last_run: Option<i64> = row.try_get("last_run").map_err(db_error)?;
        let next_run: i64 = row.try_get("next_run").map_err(db_error)?;
        let enabled: bool = row.try_get("enabled").map_err(db_error)?;
        let max_retries: i64 = row.try_get("max_retries").map_err(db_error)?;

        Ok(ScheduleEntry {
            name: row.try_get("name").map_err(db_error)?,
            task_name: row.try_get("task_name").map_err(db_error)?,
            args: serde_json::from_str(&args)?,
            cadence: serde_json::from_str::<Cadence>(&cadence)?,
            last_run: last_run.map(from_millis).transpose()?,
            next_run: from_millis(next_run)?,
            enabled,
            max_retries: u32::try_from(max_retries)
                .map_err(|_| TaskplaneError::Database(format!("invalid max_retries: {max_retries}")))?,
        })
    }
}

#[async_trait]
impl ScheduleStore for SqliteScheduleStore {
    async fn load_entries(&self) -> TaskplaneResult<Vec<ScheduleEntry>> {
        let rows = sqlx::query(
            "SELECT name, task_name, args, cadence, last_run, next_run, enabled, max_retries FROM schedule_entries ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn save_entry(&self, entry: &ScheduleEntry) -> TaskplaneResult<()> {
        sqlx::query(
            r#"
            INSERT INTO schedule_entries (name, task_name, args, cadence, last_run, next_run, enabled, max_retries)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT(name) DO UPDATE SET
                task_name = excluded.task_name,
                args = excluded.args,
                cadence = excluded.cadence,
                last_run = excluded.last_run,
                next_run = excluded.next_run,
                enabled = excluded.enabled,
                max_retries = excluded.max_retries
            "#,
        )
        .bind(&entry.name)
        .bind(&entry.task_name)
        .bind(serde_json::to_string(&entry.args)?)
        .bind(serde_json::to_string(&entry.cadence)?)
        .bind(entry.last_run.map(to_millis))
        .bind(to_millis(entry.next_run))
        .bind(entry.enabled)
        .bind(i64::from(entry.max_retries))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        debug!(entry = %entry.name, next_run = %entry.next_run, "保存周期任务进度");
        Ok(())
    }

    async fn register_entry(&self, entry: &ScheduleEntry) -> TaskplaneResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO schedule_entries (name, task_name, args, cadence, last_run, next_run, enabled, max_retries)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(&entry.name)
        .bind(&entry.task_name)
        .bind(serde_json::to_string(&entry.args)?)
        .bind(serde_json::to_string(&entry.cadence)?)
        .bind(entry.last_run.map(to_millis))
        .bind(to_millis(entry.next_run))
        .bind(entry.enabled)
        .bind(i64::from(entry.max_retries))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::connect;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    async fn store_in(dir: &tempfile::TempDir) -> SqliteScheduleStore {
        let url = format!("sqlite://{}", dir.path().join("beat.db").display());
        SqliteScheduleStore::new(connect(&url).await.unwrap())
    }

    #[tokio::test]
    async fn test_progress_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut entry = ScheduleEntry::new("stats", "dashboard.update_stats", Cadence::every_seconds(300), now)
            .unwrap()
            .with_args(json!({"scope": "all"}));

        {
            let store = store_in(&dir).await;
            assert!(store.register_entry(&entry).await.unwrap());
            entry.mark_fired(entry.next_run).unwrap();
            store.save_entry(&entry).await.unwrap();
        }

        let store = store_in(&dir).await;
        let loaded = store.load_entries().await.unwrap();
        assert_eq!(loaded, vec![entry]);
    }

    #[tokio::test]
    async fn test_register_keeps_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        let original = ScheduleEntry::new("cleanup", "sessions.cleanup_expired", Cadence::every_seconds(3600), now).unwrap();
        assert!(store.register_entry(&original).await.unwrap());

        let replacement = original.clone().with_enabled(false);
        assert!(!store.register_entry(&replacement).await.unwrap());

        let loaded = store.load_entries().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].enabled);
    }

    #[tokio::test]
    async fn test_cron_cadence_round_trips_through_json_column() {
        let store = SqliteScheduleStore::new(connect("sqlite::memory:").await.unwrap());
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let entry = ScheduleEntry::new("digest", "digest.send_weekly", Cadence::cron("0 0 9 * * Mon").unwrap(), now).unwrap();
        store.save_entry(&entry).await.unwrap();

        let loaded = store.load_entries().await.unwrap();
        assert_eq!(loaded[0].cadence, entry.cadence);
        assert_eq!(loaded[0].next_run, entry.next_run);
    }
}
