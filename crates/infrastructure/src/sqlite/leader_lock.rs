use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use taskplane_core::{LeaderLock, LockLease, SharedClock, TaskplaneResult};

use super::{db_error, from_millis, to_millis};
use crate::memory::ttl_to_chrono;

/// 基于单行记录的租约锁
///
/// 获取时用带条件的upsert：只有记录不存在、已过期或属于同一持有者时才会写入，
/// 每次写入token加一作为fencing token。
#[derive(Debug, Clone)]
pub struct SqliteLeaderLock {
    pool: SqlitePool,
    clock: SharedClock,
}

impl SqliteLeaderLock {
    pub fn new(pool: SqlitePool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }
}

#[async_trait]
impl LeaderLock for SqliteLeaderLock {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> TaskplaneResult<Option<LockLease>> {
        let now = self.clock.now();
        let expires_at = now + ttl_to_chrono(ttl)?;

        let row = sqlx::query(
            r#"
            INSERT INTO leader_locks (name, holder, token, expires_at)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                token = leader_locks.token + 1,
                expires_at = excluded.expires_at
            WHERE leader_locks.expires_at <= $4 OR leader_locks.holder = excluded.holder
            RETURNING token, expires_at
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(to_millis(expires_at))
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            debug!(lock = name, holder, "锁已被其他实例持有");
            return Ok(None);
        };
        let token: i64 = row.try_get("token").map_err(db_error)?;
        let expires_at: i64 = row.try_get("expires_at").map_err(db_error)?;

        Ok(Some(LockLease {
            name: name.to_string(),
            holder: holder.to_string(),
            token: token as u64,
            expires_at: from_millis(expires_at)?,
        }))
    }

    async fn renew(&self, lease: &LockLease, ttl: Duration) -> TaskplaneResult<bool> {
        let now = self.clock.now();
        let expires_at = now + ttl_to_chrono(ttl)?;
        let result = sqlx::query(
            "UPDATE leader_locks SET expires_at = $1 WHERE name = $2 AND holder = $3 AND token = $4 AND expires_at > $5",
        )
        .bind(to_millis(expires_at))
        .bind(&lease.name)
        .bind(&lease.holder)
        .bind(lease.token as i64)
        .bind(to_millis(now))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, lease: &LockLease) -> TaskplaneResult<()> {
        // 只让记录过期，不删除，保证token持续递增
        sqlx::query(
            "UPDATE leader_locks SET expires_at = $1 WHERE name = $2 AND holder = $3 AND token = $4",
        )
        .bind(to_millis(self.clock.now()))
        .bind(&lease.name)
        .bind(&lease.holder)
        .bind(lease.token as i64)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}
