use async_trait::async_trait;

use crate::models::{PoolStats, UtilizationSample};
use crate::TaskplaneResult;

/// 自动扩缩容读取利用率的来源
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch_sample(&self) -> TaskplaneResult<UtilizationSample>;
}

/// 提供Worker池当前执行槽状态，供指标导出器采样
pub trait PoolStatsProvider: Send + Sync {
    fn pool_stats(&self) -> PoolStats;
}
