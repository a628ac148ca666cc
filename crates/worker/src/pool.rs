use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskplane_core::models::{InstanceKind, ResourceSpec};
use taskplane_core::{PoolStats, PoolStatsProvider, ScaleTarget, TaskBroker, TaskplaneResult};
use taskplane_governor::{Governor, Reservation};

use crate::events::TaskEvent;
use crate::handler::HandlerRegistry;
use crate::worker::{Worker, WorkerHandle, WorkerSettings};

const EVENT_CAPACITY: usize = 1024;

/// Worker池参数
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub namespace: String,
    pub pool: String,
    pub worker: WorkerSettings,
    /// 每个Worker实例声明的资源形状
    pub resources: ResourceSpec,
    pub reconcile_interval: Duration,
    pub initial_replicas: u32,
}

struct Instance {
    handle: WorkerHandle,
    // 实例存活期间一直占用配额
    _reservation: Reservation,
}

struct PoolInner {
    settings: PoolSettings,
    broker: Arc<dyn TaskBroker>,
    registry: Arc<HandlerRegistry>,
    governor: Governor,
    instances: Mutex<Vec<Instance>>,
    desired_tx: watch::Sender<u32>,
    events: broadcast::Sender<TaskEvent>,
    host: String,
    seq: AtomicU64,
}

/// Worker实例集合
///
/// 期望副本数通过watch通道发布（[`ScaleTarget::set_desired_replicas`]），
/// 由 [`WorkerPool::run`] 中的协调循环异步地增减实例。
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(
        settings: PoolSettings,
        broker: Arc<dyn TaskBroker>,
        registry: HandlerRegistry,
        governor: Governor,
    ) -> Self {
        let (desired_tx, _) = watch::channel(settings.initial_replicas);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());

        Self {
            inner: Arc::new(PoolInner {
                settings,
                broker,
                registry: Arc::new(registry),
                governor,
                instances: Mutex::new(Vec::new()),
                desired_tx,
                events,
                host,
                seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    pub fn desired_replicas(&self) -> u32 {
        *self.inner.desired_tx.borrow()
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.lock_instances()
            .iter()
            .map(|instance| instance.handle.id().to_string())
            .collect()
    }

    fn lock_instances(&self) -> std::sync::MutexGuard<'_, Vec<Instance>> {
        self.inner
            .instances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn next_worker_id(&self) -> String {
        let seq = self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}@{}-{}", self.inner.settings.pool, self.inner.host, seq)
    }

    /// 使实例数量向期望副本数收敛一次
    ///
    /// 扩容时每个实例都要先通过资源准入；准入被拒绝时停止本轮扩容，
    /// 等待下一次期望值变化或协调周期再试。
    pub async fn reconcile(&self) {
        let desired = self.desired_replicas();
        let current = self.current_replicas();

        if current < desired {
            for _ in current..desired {
                if let Err(e) = self.start_instance().await {
                    counter!(
                        "taskplane_pool_scale_up_blocked_total",
                        "namespace" => self.inner.settings.namespace.clone(),
                        "pool" => self.inner.settings.pool.clone()
                    )
                    .increment(1);
                    warn!(desired, current = self.current_replicas(), error = %e, "扩容被资源准入拒绝");
                    break;
                }
            }
        } else if current > desired {
            let surplus: Vec<Instance> = {
                let mut instances = self.lock_instances();
                let keep = desired as usize;
                instances.drain(keep..).collect()
            };
            info!(desired, removing = surplus.len(), "缩容Worker实例");
            futures::future::join_all(surplus.into_iter().map(|instance| async move {
                instance.handle.shutdown().await;
                // reservation 随实例一起释放
            }))
            .await;
        }

        let replicas = self.current_replicas();
        let labels = [
            ("namespace", self.inner.settings.namespace.clone()),
            ("pool", self.inner.settings.pool.clone()),
        ];
        gauge!("taskplane_pool_replicas", &labels).set(f64::from(replicas));
        gauge!("taskplane_pool_desired_replicas", &labels).set(f64::from(desired));
        debug!(desired, replicas, "协调完成");
    }

    async fn start_instance(&self) -> TaskplaneResult<()> {
        let inner = &self.inner;
        let worker_id = self.next_worker_id();
        let (handle, reservation) = inner
            .governor
            .admit_and_create(
                &inner.settings.namespace,
                InstanceKind::Worker,
                &inner.settings.resources,
                move |resources| async move {
                    info!(worker_id = %worker_id, ?resources, "资源准入通过，创建Worker实例");
                    let worker = Worker::new(
                        worker_id.clone(),
                        Arc::clone(&inner.broker),
                        Arc::clone(&inner.registry),
                        inner.settings.worker.clone(),
                        inner.events.clone(),
                    );
                    Ok(worker.spawn())
                },
            )
            .await?;

        self.lock_instances().push(Instance {
            handle,
            _reservation: reservation,
        });
        Ok(())
    }

    /// 协调循环：期望值变化或每个协调周期执行一次，收到关闭信号后停止全部实例
    pub fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let pool = self.clone();
        let mut desired_rx = self.inner.desired_tx.subscribe();
        tokio::spawn(async move {
            loop {
                pool.reconcile().await;
                tokio::select! {
                    changed = desired_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(pool.inner.settings.reconcile_interval) => {}
                    _ = shutdown_rx.recv() => break,
                }
            }
            pool.shutdown().await;
        })
    }

    /// 停止全部实例
    pub async fn shutdown(&self) {
        let instances: Vec<Instance> = self.lock_instances().drain(..).collect();
        info!(count = instances.len(), "停止Worker池");
        futures::future::join_all(
            instances
                .into_iter()
                .map(|instance| async move { instance.handle.shutdown().await }),
        )
        .await;
    }
}

impl PoolStatsProvider for WorkerPool {
    fn pool_stats(&self) -> PoolStats {
        let instances = self.lock_instances();
        instances.iter().fold(
            PoolStats {
                worker_count: instances.len() as u32,
                ..PoolStats::default()
            },
            |mut stats, instance| {
                stats.active_tasks += instance.handle.active_tasks();
                stats.total_slots += instance.handle.total_slots();
                stats
            },
        )
    }
}

impl ScaleTarget for WorkerPool {
    fn current_replicas(&self) -> u32 {
        self.lock_instances().len() as u32
    }

    fn set_desired_replicas(&self, replicas: u32) {
        let previous = self.inner.desired_tx.send_replace(replicas);
        if previous != replicas {
            info!(from = previous, to = replicas, "期望副本数变更");
        }
    }
}
