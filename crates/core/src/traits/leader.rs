use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TaskplaneResult;

/// 成功获取的领导锁
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    pub name: String,
    pub holder: String,
    /// 单调递增的fencing token，每次新获取都会变大
    pub token: u64,
    pub expires_at: DateTime<Utc>,
}

/// 可续约、会过期的分布式锁
#[async_trait]
pub trait LeaderLock: Send + Sync {
    /// 尝试获取锁；锁被他人持有且未过期时返回 `None`
    async fn try_acquire(
        &self,
        name: &str,
        holder: &str,
        ttl: Duration,
    ) -> TaskplaneResult<Option<LockLease>>;

    /// 续约，锁已不属于该持有者时返回 `false`
    async fn renew(&self, lease: &LockLease, ttl: Duration) -> TaskplaneResult<bool>;

    /// 主动释放锁
    async fn release(&self, lease: &LockLease) -> TaskplaneResult<()>;
}
