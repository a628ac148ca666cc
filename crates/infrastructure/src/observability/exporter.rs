use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskplane_core::{
    MetricsSource, PoolStatsProvider, SharedClock, TaskBroker, TaskplaneResult, UtilizationSample,
};

use super::metrics_collector::MetricsCollector;
use super::utilization::UtilizationSource;

/// Aggregates pool and queue state into utilization samples
///
/// Every sample is published to the Prometheus gauges and kept in a bounded
/// history for `/metrics/utilization`.
pub struct MetricsExporter {
    namespace: String,
    pool: String,
    broker: Arc<dyn TaskBroker>,
    stats: Arc<dyn PoolStatsProvider>,
    utilization: UtilizationSource,
    clock: SharedClock,
    collector: MetricsCollector,
    history: RwLock<VecDeque<UtilizationSample>>,
    capacity: usize,
}

impl MetricsExporter {
    pub fn new(
        namespace: impl Into<String>,
        pool: impl Into<String>,
        broker: Arc<dyn TaskBroker>,
        stats: Arc<dyn PoolStatsProvider>,
        utilization: UtilizationSource,
        clock: SharedClock,
        capacity: usize,
    ) -> Self {
        let namespace = namespace.into();
        let pool = pool.into();
        let collector = MetricsCollector::new(&namespace, &pool);
        Self {
            namespace,
            pool,
            broker,
            stats,
            utilization,
            clock,
            collector,
            history: RwLock::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    /// Take a fresh sample, publish it and append it to the history
    pub async fn collect(&self) -> TaskplaneResult<UtilizationSample> {
        let queue_depth = self.broker.queue_depth().await?;
        let stats = self.stats.pool_stats();
        let (avg_cpu_percent, avg_memory_percent) = self.utilization.measure(&stats);

        let sample = UtilizationSample {
            timestamp: self.clock.now(),
            namespace: self.namespace.clone(),
            pool: self.pool.clone(),
            worker_count: stats.worker_count,
            active_tasks: stats.active_tasks,
            total_slots: stats.total_slots,
            avg_cpu_percent,
            avg_memory_percent,
            queue_depth,
        };
        self.collector.record_sample(&sample);

        let mut history = self.history.write().await;
        history.push_back(sample.clone());
        while history.len() > self.capacity {
            history.pop_front();
        }

        debug!(
            workers = sample.worker_count,
            active = sample.active_tasks,
            queue_depth = sample.queue_depth,
            cpu = sample.avg_cpu_percent,
            "Utilization sample collected"
        );
        Ok(sample)
    }

    pub async fn latest(&self) -> Option<UtilizationSample> {
        self.history.read().await.back().cloned()
    }

    /// Oldest first
    pub async fn history(&self) -> Vec<UtilizationSample> {
        self.history.read().await.iter().cloned().collect()
    }

    /// Sample periodically until shutdown
    pub fn start(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let exporter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = exporter.collect().await {
                            warn!(error = %e, "Failed to collect utilization sample");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Metrics exporter stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl MetricsSource for MetricsExporter {
    async fn fetch_sample(&self) -> TaskplaneResult<UtilizationSample> {
        self.collect().await
    }
}
