use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};

use taskplane_core::{LeaderLock, LockLease, TaskplaneResult};

/// 调度器实例的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Standby,
    Active,
}

/// 基于可续约租约锁的领导选举
pub struct LeaderElector {
    lock: Arc<dyn LeaderLock>,
    name: String,
    holder: String,
    ttl: Duration,
    lease: Option<LockLease>,
}

impl LeaderElector {
    pub fn new(
        lock: Arc<dyn LeaderLock>,
        name: impl Into<String>,
        holder: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            lock,
            name: name.into(),
            holder: holder.into(),
            ttl,
            lease: None,
        }
    }

    pub fn role(&self) -> Role {
        if self.lease.is_some() {
            Role::Active
        } else {
            Role::Standby
        }
    }

    /// 当前持有的fencing token
    pub fn token(&self) -> Option<u64> {
        self.lease.as_ref().map(|lease| lease.token)
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Standby尝试获取锁，成功后成为Active
    pub async fn try_acquire(&mut self) -> TaskplaneResult<bool> {
        if self.lease.is_some() {
            return Ok(true);
        }
        match self.lock.try_acquire(&self.name, &self.holder, self.ttl).await? {
            Some(lease) => {
                info!(lock = %self.name, holder = %self.holder, token = lease.token, "获得调度器领导权");
                counter!("taskplane_beat_leadership_acquired_total").increment(1);
                self.lease = Some(lease);
                Ok(true)
            }
            None => {
                debug!(lock = %self.name, "调度器锁被其他实例持有，保持Standby");
                Ok(false)
            }
        }
    }

    /// Active续约；续约失败或出错都会立即退回Standby
    pub async fn renew(&mut self) -> bool {
        let Some(lease) = self.lease.as_ref() else {
            return false;
        };
        let renewed = match self.lock.renew(lease, self.ttl).await {
            Ok(renewed) => renewed,
            Err(e) => {
                warn!(lock = %self.name, error = %e, "续约领导锁出错");
                false
            }
        };
        if !renewed {
            warn!(lock = %self.name, holder = %self.holder, "失去调度器领导权，退回Standby");
            counter!("taskplane_beat_leadership_lost_total").increment(1);
            self.lease = None;
        }
        renewed
    }

    /// 主动释放锁，使Standby实例无需等待过期即可接管
    pub async fn release(&mut self) {
        if let Some(lease) = self.lease.take() {
            match self.lock.release(&lease).await {
                Ok(()) => info!(lock = %self.name, holder = %self.holder, "已释放调度器领导锁"),
                Err(e) => warn!(lock = %self.name, error = %e, "释放领导锁失败，等待其自然过期"),
            }
        }
    }
}
