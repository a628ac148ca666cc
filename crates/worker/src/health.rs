use std::sync::Arc;

use serde::Serialize;
use taskplane_core::{PoolStatsProvider, TaskBroker};
use tracing::debug;

/// 检查结果，`healthy` 为false时API返回503
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub broker_reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_slots: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 存活与就绪检查
///
/// 存活：队列可达。就绪：队列可达并且至少有一个空闲执行槽。
#[derive(Clone)]
pub struct HealthCheck {
    broker: Arc<dyn TaskBroker>,
    stats: Arc<dyn PoolStatsProvider>,
}

impl HealthCheck {
    pub fn new(broker: Arc<dyn TaskBroker>, stats: Arc<dyn PoolStatsProvider>) -> Self {
        Self { broker, stats }
    }

    pub async fn liveness(&self) -> HealthReport {
        match self.broker.ping().await {
            Ok(()) => HealthReport {
                healthy: true,
                broker_reachable: true,
                free_slots: None,
                error: None,
            },
            Err(e) => {
                debug!(error = %e, "存活检查失败");
                HealthReport {
                    healthy: false,
                    broker_reachable: false,
                    free_slots: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn readiness(&self) -> HealthReport {
        let mut report = self.liveness().await;
        let stats = self.stats.pool_stats();
        let free = stats.total_slots.saturating_sub(stats.active_tasks);
        report.free_slots = Some(free);
        if report.healthy && free == 0 {
            report.healthy = false;
            report.error = Some("没有空闲的执行槽".to_string());
        }
        report
    }
}
