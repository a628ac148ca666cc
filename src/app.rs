use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use taskplane_api::{create_app, AppState};
use taskplane_core::models::InstanceKind;
use taskplane_core::{
    AppConfig, MetricsSource, PoolStats, PoolStatsProvider, ScaleTarget, SharedClock, SystemClock,
};
use taskplane_dispatcher::{
    Autoscaler, BeatScheduler, BeatSettings, BeatStatusHandle, TaskSubmitter,
};
use taskplane_governor::{Governor, Reservation};
use taskplane_infrastructure::{
    BrokerFactory, HttpMetricsSource, InMemoryBroker, MetricsExporter, StoreFactory,
    UtilizationSource,
};
use taskplane_worker::{HandlerRegistry, HealthCheck, PoolSettings, WorkerPool, WorkerSettings};

use crate::shutdown::ShutdownManager;

/// 未启用Worker池时的统计来源
struct NoPool;

impl PoolStatsProvider for NoPool {
    fn pool_stats(&self) -> PoolStats {
        PoolStats::default()
    }
}

/// 主应用程序
///
/// 按配置把Worker池、自动扩缩容、Beat调度器、指标采样与API服务组装到同一进程中。
pub struct Application {
    config: AppConfig,
    instance_id: String,
    clock: SharedClock,
    governor: Governor,
    broker: InMemoryBroker,
    submitter: Arc<TaskSubmitter>,
    pool: Option<WorkerPool>,
    exporter: Arc<MetricsExporter>,
    prometheus: Option<PrometheusHandle>,
}

impl Application {
    pub fn new(
        config: AppConfig,
        instance_id: impl Into<String>,
        registry: HandlerRegistry,
        prometheus: Option<PrometheusHandle>,
    ) -> Result<Self> {
        let instance_id = instance_id.into();
        info!(instance = %instance_id, "初始化应用程序");
        let clock = SystemClock::shared();

        let governor = Governor::new().with_namespace(
            config.governor.namespace.clone(),
            config.governor.quota,
            config.governor.limit_range,
        );

        let broker =
            BrokerFactory::create(&config.broker, clock.clone()).context("创建任务队列失败")?;
        let shared_broker = Arc::new(broker.clone());
        let submitter = Arc::new(TaskSubmitter::new(shared_broker.clone()));

        let pool = if config.worker.enabled {
            let initial_replicas = if config.autoscaler.enabled {
                config.autoscaler.min_replicas
            } else {
                config.worker.replicas
            };
            let settings = PoolSettings {
                namespace: config.governor.namespace.clone(),
                pool: config.worker.pool.clone(),
                worker: WorkerSettings::from_config(&config.worker, &config.broker),
                resources: config.governor.worker_resources,
                reconcile_interval: config.worker.reconcile_interval(),
                initial_replicas,
            };
            info!(tasks = ?registry.task_names(), replicas = initial_replicas, "创建Worker池");
            Some(WorkerPool::new(
                settings,
                shared_broker.clone(),
                registry,
                governor.clone(),
            ))
        } else {
            None
        };

        let stats: Arc<dyn PoolStatsProvider> = match &pool {
            Some(pool) => Arc::new(pool.clone()),
            None => Arc::new(NoPool),
        };
        let utilization = UtilizationSource::from_name(&config.observability.utilization_source)
            .context("创建利用率来源失败")?;
        let exporter = Arc::new(MetricsExporter::new(
            config.governor.namespace.clone(),
            config.worker.pool.clone(),
            shared_broker,
            stats,
            utilization,
            clock.clone(),
            config.observability.sample_history,
        ));

        Ok(Self {
            config,
            instance_id,
            clock,
            governor,
            broker,
            submitter,
            pool,
            exporter,
            prometheus,
        })
    }

    pub fn submitter(&self) -> Arc<TaskSubmitter> {
        self.submitter.clone()
    }

    pub fn pool(&self) -> Option<&WorkerPool> {
        self.pool.as_ref()
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    /// 启动全部已启用的组件，直到收到关闭信号且所有组件退出
    ///
    /// 准入或存储初始化失败时在启动任何组件之前返回错误。
    pub async fn run(&self, shutdown: ShutdownManager) -> Result<()> {
        let autoscaler = match &self.pool {
            Some(pool) if self.config.autoscaler.enabled => {
                Some(Arc::new(self.build_autoscaler(pool)?))
            }
            None if self.config.autoscaler.enabled => {
                warn!("Worker池未启用，忽略自动扩缩容配置");
                None
            }
            _ => None,
        };

        // Beat调度器在整个运行期间占用一份Scheduler配额
        let beat: Option<(BeatScheduler, Reservation)> = if self.config.beat.enabled {
            let reservation = self
                .governor
                .admit(
                    &self.config.governor.namespace,
                    InstanceKind::Scheduler,
                    &self.config.governor.scheduler_resources,
                )
                .context("Beat调度器准入失败")?;
            Some((self.build_beat().await?, reservation))
        } else {
            None
        };

        let mut handles: Vec<(&'static str, JoinHandle<()>)> = Vec::new();
        handles.push((
            "broker-reaper",
            self.broker.start_reaper(shutdown.subscribe().await),
        ));
        handles.push((
            "metrics-exporter",
            self.exporter.start(
                self.config.observability.sample_interval(),
                shutdown.subscribe().await,
            ),
        ));
        if let Some(pool) = &self.pool {
            handles.push(("worker-pool", pool.run(shutdown.subscribe().await)));
        }
        if let Some(scaler) = &autoscaler {
            handles.push(("autoscaler", scaler.run(shutdown.subscribe().await)));
        }

        let (beat_status, _beat_reservation) = match beat {
            Some((scheduler, reservation)) => {
                let status = scheduler.status_handle();
                handles.push(("beat", scheduler.run(shutdown.subscribe().await)));
                (Some(status), Some(reservation))
            }
            None => (None, None),
        };

        if self.config.api.enabled {
            let state = AppState {
                submitter: self.submitter.clone(),
                health: HealthCheck::new(Arc::new(self.broker.clone()), self.stats()),
                exporter: self.exporter.clone(),
                prometheus: self.prometheus.clone(),
                governor: self.governor.clone(),
                beat_status,
                autoscaler,
            };
            let bind_address = self.config.api.bind_address.clone();
            let shutdown_rx = shutdown.subscribe().await;
            handles.push((
                "api",
                tokio::spawn(async move {
                    if let Err(e) = taskplane_api::serve(&bind_address, create_app(state), shutdown_rx).await {
                        error!(error = %e, "API服务运行失败");
                    }
                }),
            ));
        }

        info!(instance = %self.instance_id, components = handles.len(), "所有组件已启动");

        for (name, handle) in handles {
            if let Err(e) = handle.await {
                error!(component = name, error = %e, "组件异常退出");
            }
        }
        info!("所有组件已停止");
        Ok(())
    }

    fn stats(&self) -> Arc<dyn PoolStatsProvider> {
        match &self.pool {
            Some(pool) => Arc::new(pool.clone()),
            None => Arc::new(NoPool),
        }
    }

    fn build_autoscaler(&self, pool: &WorkerPool) -> Result<Autoscaler> {
        let config = &self.config.autoscaler;
        let source: Arc<dyn MetricsSource> = match &config.metrics_url {
            Some(url) => {
                info!(url = %url, "自动扩缩容使用远端指标");
                Arc::new(
                    HttpMetricsSource::new(url.clone(), config.metrics_timeout())
                        .context("创建远端指标客户端失败")?,
                )
            }
            None => self.exporter.clone(),
        };
        let target: Arc<dyn ScaleTarget> = Arc::new(pool.clone());
        Ok(Autoscaler::new(
            config.policy(),
            source,
            target,
            config.poll_interval(),
            config.metrics_timeout(),
            self.clock.clone(),
        ))
    }

    async fn build_beat(&self) -> Result<BeatScheduler> {
        let stores = StoreFactory::create(&self.config.beat, self.clock.clone())
            .await
            .context("创建调度存储失败")?;
        let scheduler = BeatScheduler::new(
            BeatSettings::from_config(&self.config.beat, self.instance_id.clone()),
            Arc::new(self.broker.clone()),
            stores.schedules,
            stores.lock,
            self.clock.clone(),
        );
        let entries = self
            .config
            .beat
            .effective_entries()
            .context("解析周期任务失败")?;
        scheduler.seed(entries).await.context("写入周期任务失败")?;
        Ok(scheduler)
    }
}
