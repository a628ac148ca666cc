use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use taskplane_core::{LeaderLock, LockLease, SharedClock, SystemClock, TaskplaneError, TaskplaneResult};

#[derive(Debug, Clone)]
struct LockRecord {
    holder: String,
    token: u64,
    expires_at: DateTime<Utc>,
}

/// 进程内的领导锁，适用于单机部署与测试
#[derive(Debug, Clone)]
pub struct InMemoryLeaderLock {
    locks: Arc<Mutex<HashMap<String, LockRecord>>>,
    clock: SharedClock,
}

impl Default for InMemoryLeaderLock {
    fn default() -> Self {
        Self::new(SystemClock::shared())
    }
}

impl InMemoryLeaderLock {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            clock,
        }
    }
}

pub(crate) fn ttl_to_chrono(ttl: Duration) -> TaskplaneResult<chrono::Duration> {
    chrono::Duration::from_std(ttl)
        .map_err(|e| TaskplaneError::Configuration(format!("invalid lock ttl: {e}")))
}

#[async_trait]
impl LeaderLock for InMemoryLeaderLock {
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> TaskplaneResult<Option<LockLease>> {
        let now = self.clock.now();
        let expires_at = now + ttl_to_chrono(ttl)?;
        let mut locks = self.locks.lock().await;

        let token = match locks.get(name) {
            Some(record) if record.expires_at > now && record.holder != holder => {
                debug!(lock = name, holder = %record.holder, "锁已被持有");
                return Ok(None);
            }
            Some(record) => record.token + 1,
            None => 1,
        };

        locks.insert(
            name.to_string(),
            LockRecord {
                holder: holder.to_string(),
                token,
                expires_at,
            },
        );
        Ok(Some(LockLease {
            name: name.to_string(),
            holder: holder.to_string(),
            token,
            expires_at,
        }))
    }

    async fn renew(&self, lease: &LockLease, ttl: Duration) -> TaskplaneResult<bool> {
        let now = self.clock.now();
        let expires_at = now + ttl_to_chrono(ttl)?;
        let mut locks = self.locks.lock().await;
        match locks.get_mut(&lease.name) {
            Some(record)
                if record.holder == lease.holder
                    && record.token == lease.token
                    && record.expires_at > now =>
            {
                record.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, lease: &LockLease) -> TaskplaneResult<()> {
        let now = self.clock.now();
        let mut locks = self.locks.lock().await;
        if let Some(record) = locks.get_mut(&lease.name) {
            if record.holder == lease.holder && record.token == lease.token {
                // 保留记录以维持token单调递增
                record.expires_at = now;
            }
        }
        Ok(())
    }
}
