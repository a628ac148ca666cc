use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::sync::{broadcast, mpsc, watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use taskplane_core::config::{BrokerConfig, WorkerConfig};
use taskplane_core::{Lease, Requeue, TaskBroker, TaskplaneError};

use crate::events::TaskEvent;
use crate::handler::{HandlerRegistry, HandlerSet};
use crate::retry::RetryPolicy;

/// 队列不可用时的最大退避
const MAX_BROKER_BACKOFF: Duration = Duration::from_secs(30);

/// 单个Worker实例的运行参数
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub prefetch_limit: usize,
    pub max_tasks_per_child: u64,
    pub poll_interval: Duration,
    pub lease_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub retry: RetryPolicy,
}

impl WorkerSettings {
    pub fn from_config(worker: &WorkerConfig, broker: &BrokerConfig) -> Self {
        Self {
            concurrency: worker.concurrency,
            prefetch_limit: worker.prefetch_limit(),
            max_tasks_per_child: worker.max_tasks_per_child,
            poll_interval: worker.poll_interval(),
            lease_timeout: broker.lease_timeout(),
            shutdown_timeout: worker.shutdown_timeout(),
            retry: RetryPolicy::from_config(worker),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default(), &BrokerConfig::default())
    }
}

/// 执行槽计数，供健康检查与指标采样读取
#[derive(Debug, Default)]
pub(crate) struct SlotCounters {
    pub(crate) active: AtomicU32,
    pub(crate) total: AtomicU32,
    pub(crate) draining: AtomicBool,
}

type Prefetched = (Lease, OwnedSemaphorePermit);

/// Worker实例
///
/// 一个取任务协程持续租用任务，最多持有 `prefetch_limit` 个已租未完成的任务；
/// `concurrency` 个执行槽并行处理。执行槽开始处理前续约，租约已丢失的预取任务直接放弃。
pub struct Worker {
    id: String,
    broker: Arc<dyn TaskBroker>,
    registry: Arc<HandlerRegistry>,
    settings: WorkerSettings,
    events: broadcast::Sender<TaskEvent>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        broker: Arc<dyn TaskBroker>,
        registry: Arc<HandlerRegistry>,
        settings: WorkerSettings,
        events: broadcast::Sender<TaskEvent>,
    ) -> Self {
        Self {
            id: id.into(),
            broker,
            registry,
            settings,
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 启动取任务协程与全部执行槽
    pub fn spawn(self) -> WorkerHandle {
        let worker = Arc::new(self);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (queue_tx, queue_rx) = mpsc::channel::<Prefetched>(worker.settings.prefetch_limit.max(1));
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let counters = Arc::new(SlotCounters::default());
        counters
            .total
            .store(worker.settings.concurrency as u32, Ordering::SeqCst);

        info!(
            worker_id = %worker.id,
            concurrency = worker.settings.concurrency,
            prefetch_limit = worker.settings.prefetch_limit,
            "启动Worker实例"
        );

        let fetcher = {
            let worker = Arc::clone(&worker);
            let stop_rx = stop_rx.clone();
            tokio::spawn(async move { worker.fetch_loop(queue_tx, stop_rx).await })
        };

        let slots = (0..worker.settings.concurrency)
            .map(|slot| {
                let worker = Arc::clone(&worker);
                let queue_rx = Arc::clone(&queue_rx);
                let counters = Arc::clone(&counters);
                let stop_rx = stop_rx.clone();
                tokio::spawn(async move { worker.slot_loop(slot, queue_rx, counters, stop_rx).await })
            })
            .collect();

        WorkerHandle {
            worker,
            stop_tx,
            fetcher,
            slots,
            queue_rx,
            counters,
        }
    }

    async fn fetch_loop(&self, queue_tx: mpsc::Sender<Prefetched>, mut stop_rx: watch::Receiver<bool>) {
        let prefetch = Arc::new(Semaphore::new(self.settings.prefetch_limit.max(1)));
        let mut backoff = self.settings.poll_interval;

        loop {
            let permit = tokio::select! {
                _ = stop_rx.changed() => break,
                permit = Arc::clone(&prefetch).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            if *stop_rx.borrow() {
                break;
            }

            let wait = match self.broker.lease(&self.id, self.settings.lease_timeout).await {
                Ok(Some(lease)) => {
                    backoff = self.settings.poll_interval;
                    debug!(worker_id = %self.id, task_id = %lease.task_id(), task = %lease.task.name, "租用任务");
                    if queue_tx.send((lease, permit)).await.is_err() {
                        break;
                    }
                    continue;
                }
                Ok(None) => self.settings.poll_interval,
                Err(e) => {
                    counter!("taskplane_worker_broker_errors_total").increment(1);
                    warn!(worker_id = %self.id, error = %e, retry_in = ?backoff, "租用任务失败，退避后重试");
                    let wait = backoff;
                    backoff = (backoff * 2).min(MAX_BROKER_BACKOFF);
                    wait
                }
            };
            drop(permit);

            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        debug!(worker_id = %self.id, "停止租用任务");
    }

    async fn slot_loop(
        &self,
        slot: usize,
        queue_rx: Arc<Mutex<mpsc::Receiver<Prefetched>>>,
        counters: Arc<SlotCounters>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let mut generation = 0u64;
        let mut handlers = self.registry.instantiate();
        let mut processed = 0u64;

        loop {
            if *stop_rx.borrow() {
                break;
            }
            let next = tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                next = async { queue_rx.lock().await.recv().await } => next,
            };
            let Some((lease, permit)) = next else { break };

            counters.active.fetch_add(1, Ordering::SeqCst);
            let span = info_span!(
                "execute_task",
                worker_id = %self.id,
                slot,
                task_id = %lease.task_id(),
                task = %lease.task.name
            );
            self.execute(lease, &handlers).instrument(span).await;
            counters.active.fetch_sub(1, Ordering::SeqCst);
            drop(permit);

            processed += 1;
            if processed >= self.settings.max_tasks_per_child {
                generation += 1;
                processed = 0;
                handlers = self.registry.instantiate();
                counter!("taskplane_worker_slot_recycles_total").increment(1);
                info!(worker_id = %self.id, slot, generation, "执行槽达到任务上限，已回收重建");
            }
        }
    }

    async fn execute(&self, lease: Lease, handlers: &HandlerSet) {
        // 预取等待会消耗租约时间，开始执行前续约；执行时限不超过续约后的租约
        let deadline = tokio::time::Instant::now() + self.settings.lease_timeout;
        if let Err(e) = self.broker.extend(&lease, self.settings.lease_timeout).await {
            counter!("taskplane_worker_lost_leases_total").increment(1);
            warn!(error = %e, "预取任务的租约已失效，放弃执行");
            return;
        }

        let task = &lease.task;
        let Some(handler) = handlers.get(&task.name) else {
            let reason = format!("没有注册处理器: {}", task.name);
            error!(task_id = %task.id, "{}", reason);
            self.finish_failed(&lease, task.attempt_count, reason).await;
            return;
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout_at(deadline, handler.handle(task)).await;
        let elapsed = started.elapsed().as_secs_f64();
        histogram!("taskplane_task_duration_seconds", "task" => task.name.clone()).record(elapsed);

        let error = match outcome {
            Ok(Ok(_)) => {
                match self.broker.ack(&lease).await {
                    Ok(()) => {
                        counter!("taskplane_tasks_total", "task" => task.name.clone(), "status" => "completed").increment(1);
                        info!(elapsed_seconds = elapsed, "任务执行成功");
                        self.publish(TaskEvent::Completed {
                            task_id: task.id,
                            name: task.name.clone(),
                            worker_id: self.id.clone(),
                        });
                    }
                    // 租约已过期，任务会被重新投递，依赖处理器幂等
                    Err(e) => warn!(error = %e, "任务执行成功但确认失败"),
                }
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => TaskplaneError::ExecutionTimeout.to_string(),
        };

        let attempts = task.attempt_count + 1;
        if task.can_retry() {
            let delay = self.settings.retry.delay_for(attempts);
            let requeue = Requeue::Retry {
                delay,
                error: error.clone(),
            };
            if let Err(e) = self.broker.nack(&lease, requeue).await {
                warn!(error = %e, "任务重试入队失败");
                return;
            }
            counter!("taskplane_tasks_total", "task" => task.name.clone(), "status" => "retrying").increment(1);
            warn!(attempt = attempts, max_retries = task.max_retries, retry_in = ?delay, error = %error, "任务执行失败，稍后重试");
            self.publish(TaskEvent::Retrying {
                task_id: task.id,
                name: task.name.clone(),
                attempt: attempts,
                delay,
                error,
            });
        } else {
            error!(attempts, error = %error, "任务重试次数耗尽");
            self.finish_failed(&lease, attempts, error).await;
        }
    }

    async fn finish_failed(&self, lease: &Lease, attempts: u32, reason: String) {
        let task = &lease.task;
        let requeue = Requeue::DeadLetter {
            reason: reason.clone(),
        };
        if let Err(e) = self.broker.nack(lease, requeue).await {
            warn!(task_id = %task.id, error = %e, "任务标记失败时出错");
            return;
        }
        counter!("taskplane_tasks_total", "task" => task.name.clone(), "status" => "failed").increment(1);
        self.publish(TaskEvent::Failed {
            task_id: task.id,
            name: task.name.clone(),
            attempts,
            error: reason,
        });
    }

    fn publish(&self, event: TaskEvent) {
        // 没有订阅者时发送失败，可以忽略
        let _ = self.events.send(event);
    }
}

/// 运行中的Worker实例
pub struct WorkerHandle {
    worker: Arc<Worker>,
    stop_tx: watch::Sender<bool>,
    fetcher: JoinHandle<()>,
    slots: Vec<JoinHandle<()>>,
    queue_rx: Arc<Mutex<mpsc::Receiver<Prefetched>>>,
    counters: Arc<SlotCounters>,
}

impl WorkerHandle {
    pub fn id(&self) -> &str {
        &self.worker.id
    }

    pub fn active_tasks(&self) -> u32 {
        self.counters.active.load(Ordering::SeqCst)
    }

    pub fn total_slots(&self) -> u32 {
        if self.counters.draining.load(Ordering::SeqCst) {
            0
        } else {
            self.counters.total.load(Ordering::SeqCst)
        }
    }

    pub fn free_slots(&self) -> u32 {
        self.total_slots().saturating_sub(self.active_tasks())
    }

    /// 优雅停止
    ///
    /// 不再租用新任务；执行中的任务最多等待 `shutdown_timeout`，
    /// 预取但未开始的任务归还队列。超时仍未完成的任务由租约过期回收。
    pub async fn shutdown(self) {
        let id = self.worker.id.clone();
        info!(worker_id = %id, "开始停止Worker实例");
        self.counters.draining.store(true, Ordering::SeqCst);
        let _ = self.stop_tx.send(true);

        if let Err(e) = self.fetcher.await {
            warn!(worker_id = %id, error = %e, "取任务协程异常退出");
        }

        let slot_aborts: Vec<_> = self.slots.iter().map(|slot| slot.abort_handle()).collect();
        let drained = tokio::time::timeout(
            self.worker.settings.shutdown_timeout,
            futures::future::join_all(self.slots),
        )
        .await;
        if drained.is_err() {
            warn!(worker_id = %id, "等待执行中任务超时，剩余任务将由租约过期回收");
            for abort in slot_aborts {
                abort.abort();
            }
        }

        let mut released = 0;
        let mut queue_rx = self.queue_rx.lock().await;
        queue_rx.close();
        while let Ok((lease, _permit)) = queue_rx.try_recv() {
            match self.worker.broker.release(&lease).await {
                Ok(()) => released += 1,
                Err(e) => warn!(task_id = %lease.task_id(), error = %e, "归还预取任务失败"),
            }
        }
        info!(worker_id = %id, released, "Worker实例已停止");
    }
}
