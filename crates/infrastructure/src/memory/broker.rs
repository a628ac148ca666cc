use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskplane_core::models::{Lease, Requeue, Task, TaskId, TaskState};
use taskplane_core::{SharedClock, SystemClock, TaskBroker, TaskplaneError, TaskplaneResult};

/// 内存队列配置
#[derive(Debug, Clone)]
pub struct InMemoryBrokerConfig {
    /// 队列最大容量（0表示无限制）
    pub max_queue_size: usize,
    /// 保留多少个已结束任务供状态查询
    pub finished_history: usize,
    /// 过期租约回收间隔
    pub reap_interval: Duration,
}

impl Default for InMemoryBrokerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100_000,
            finished_history: 10_000,
            reap_interval: Duration::from_secs(5),
        }
    }
}

/// 队列排序键：优先级高的在前，同优先级按入队顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<u8>,
    seq: u64,
    id: TaskId,
}

#[derive(Debug)]
struct ActiveLease {
    worker_id: String,
    token: u64,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct BrokerState {
    tasks: HashMap<TaskId, Task>,
    pending: BTreeSet<QueueKey>,
    keys: HashMap<TaskId, QueueKey>,
    leases: HashMap<TaskId, ActiveLease>,
    finished: VecDeque<TaskId>,
    seq: u64,
    lease_seq: u64,
}

impl BrokerState {
    fn push_pending(&mut self, task_id: TaskId, priority: u8) {
        self.seq += 1;
        let key = QueueKey {
            priority: Reverse(priority),
            seq: self.seq,
            id: task_id,
        };
        self.pending.insert(key);
        self.keys.insert(task_id, key);
    }

    fn take_pending(&mut self, task_id: TaskId) {
        if let Some(key) = self.keys.remove(&task_id) {
            self.pending.remove(&key);
        }
    }

    fn finish(&mut self, task_id: TaskId, history: usize) {
        self.leases.remove(&task_id);
        self.finished.push_back(task_id);
        while self.finished.len() > history {
            if let Some(old) = self.finished.pop_front() {
                self.tasks.remove(&old);
            }
        }
    }

    fn reap_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<TaskId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();

        for task_id in &expired {
            if let Some(lease) = self.leases.remove(task_id) {
                warn!(task_id = %task_id, worker_id = %lease.worker_id, "租约过期，任务重新入队");
            }
            let priority = match self.tasks.get_mut(task_id) {
                Some(task) => {
                    task.state = TaskState::Pending;
                    task.priority
                }
                None => continue,
            };
            self.push_pending(*task_id, priority);
        }
        expired.len()
    }

    /// 只有持有当前租约的Worker才能操作的任务
    fn leased_task(&mut self, lease: &Lease) -> TaskplaneResult<&mut Task> {
        let task_id = lease.task_id();
        if !self.tasks.contains_key(&task_id) {
            return Err(TaskplaneError::TaskNotFound { id: task_id });
        }
        let held = self.leases.get(&task_id).is_some_and(|active| {
            active.token == lease.token && active.worker_id == lease.worker_id
        });
        if !held {
            return Err(TaskplaneError::LeaseNotHeld { id: task_id });
        }
        self.tasks
            .get_mut(&task_id)
            .ok_or(TaskplaneError::TaskNotFound { id: task_id })
    }
}

/// 内存任务队列
///
/// 作为外部消息队列的参考实现：至少一次投递、租约过期自动重新入队、
/// 同优先级内先进先出。适用于单进程部署与测试。
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    config: InMemoryBrokerConfig,
    clock: SharedClock,
    reachable: Arc<AtomicBool>,
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("config", &self.config)
            .field("reachable", &self.reachable.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_config(InMemoryBrokerConfig::default(), SystemClock::shared())
    }

    pub fn with_config(config: InMemoryBrokerConfig, clock: SharedClock) -> Self {
        info!("Creating in-memory broker with config: {:?}", config);
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            config,
            clock,
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// 模拟队列不可达（用于健康检查与退避测试）
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// 将过期租约的任务放回队列，返回回收的数量
    pub async fn reap_expired(&self) -> usize {
        let now = self.clock.now();
        let reaped = self.state.lock().await.reap_expired(now);
        if reaped > 0 {
            counter!("taskplane_broker_redeliveries_total").increment(reaped as u64);
        }
        reaped
    }

    /// 启动周期性回收任务，收到关闭信号后退出
    pub fn start_reaper(&self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let broker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(broker.config.reap_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let reaped = broker.reap_expired().await;
                        if reaped > 0 {
                            debug!(reaped, "回收过期租约");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("租约回收任务退出");
                        break;
                    }
                }
            }
        })
    }

    fn check_reachable(&self) -> TaskplaneResult<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TaskplaneError::BrokerUnavailable(
                "in-memory broker marked unreachable".to_string(),
            ))
        }
    }

    fn deadline(&self, now: DateTime<Utc>, timeout: Duration) -> TaskplaneResult<DateTime<Utc>> {
        chrono::Duration::from_std(timeout)
            .map(|d| now + d)
            .map_err(|e| TaskplaneError::Broker(format!("invalid lease timeout: {e}")))
    }
}

#[async_trait]
impl TaskBroker for InMemoryBroker {
    async fn enqueue(&self, mut task: Task) -> TaskplaneResult<TaskId> {
        self.check_reachable()?;
        let mut state = self.state.lock().await;

        if self.config.max_queue_size > 0 && state.pending.len() >= self.config.max_queue_size {
            return Err(TaskplaneError::Broker(format!(
                "queue is full ({} tasks)",
                state.pending.len()
            )));
        }
        if state.tasks.contains_key(&task.id) {
            return Err(TaskplaneError::Broker(format!("task {} already enqueued", task.id)));
        }

        task.state = TaskState::Pending;
        let task_id = task.id;
        let priority = task.priority;
        debug!(task_id = %task_id, task_name = %task.name, eta = ?task.eta, "任务入队");
        state.tasks.insert(task_id, task);
        state.push_pending(task_id, priority);
        counter!("taskplane_broker_enqueued_total").increment(1);
        Ok(task_id)
    }

    async fn lease(&self, worker_id: &str, timeout: Duration) -> TaskplaneResult<Option<Lease>> {
        self.check_reachable()?;
        let now = self.clock.now();
        let expires_at = self.deadline(now, timeout)?;
        let mut state = self.state.lock().await;
        state.reap_expired(now);

        let next = state.pending.iter().copied().find(|key| {
            state
                .tasks
                .get(&key.id)
                .is_some_and(|task| task.is_ready(now))
        });
        let Some(key) = next else {
            return Ok(None);
        };

        state.take_pending(key.id);
        state.lease_seq += 1;
        let token = state.lease_seq;
        state.leases.insert(
            key.id,
            ActiveLease {
                worker_id: worker_id.to_string(),
                token,
                expires_at,
            },
        );
        let task = state
            .tasks
            .get_mut(&key.id)
            .ok_or(TaskplaneError::TaskNotFound { id: key.id })?;
        task.state = TaskState::Leased;

        Ok(Some(Lease {
            task: task.clone(),
            worker_id: worker_id.to_string(),
            token,
            leased_at: now,
            expires_at,
        }))
    }

    async fn extend(&self, lease: &Lease, timeout: Duration) -> TaskplaneResult<DateTime<Utc>> {
        self.check_reachable()?;
        let now = self.clock.now();
        let expires_at = self.deadline(now, timeout)?;
        let mut state = self.state.lock().await;
        // 已过期但尚未回收的租约不能再续，任务交给下一次租用
        state.reap_expired(now);
        state.leased_task(lease)?;
        if let Some(active) = state.leases.get_mut(&lease.task_id()) {
            active.expires_at = expires_at;
        }
        Ok(expires_at)
    }

    async fn ack(&self, lease: &Lease) -> TaskplaneResult<()> {
        self.check_reachable()?;
        let task_id = lease.task_id();
        let mut state = self.state.lock().await;
        let task = state.leased_task(lease)?;
        task.state = TaskState::Completed;
        state.finish(task_id, self.config.finished_history);
        counter!("taskplane_broker_acked_total").increment(1);
        Ok(())
    }

    async fn nack(&self, lease: &Lease, requeue: Requeue) -> TaskplaneResult<()> {
        self.check_reachable()?;
        let task_id = lease.task_id();
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let task = state.leased_task(lease)?;

        match requeue {
            Requeue::Retry { delay, error } => {
                task.attempt_count += 1;
                task.state = TaskState::Pending;
                task.last_error = Some(error);
                task.eta = Some(self.deadline(now, delay)?);
                let priority = task.priority;
                state.leases.remove(&task_id);
                state.push_pending(task_id, priority);
                counter!("taskplane_broker_requeued_total").increment(1);
            }
            Requeue::DeadLetter { reason } => {
                task.attempt_count += 1;
                task.state = TaskState::Failed;
                task.last_error = Some(reason);
                state.finish(task_id, self.config.finished_history);
                counter!("taskplane_broker_dead_lettered_total").increment(1);
            }
        }
        Ok(())
    }

    async fn release(&self, lease: &Lease) -> TaskplaneResult<()> {
        self.check_reachable()?;
        let task_id = lease.task_id();
        let mut state = self.state.lock().await;
        let task = state.leased_task(lease)?;
        task.state = TaskState::Pending;
        let priority = task.priority;
        state.leases.remove(&task_id);
        state.push_pending(task_id, priority);
        Ok(())
    }

    async fn queue_depth(&self) -> TaskplaneResult<u64> {
        self.check_reachable()?;
        Ok(self.state.lock().await.pending.len() as u64)
    }

    async fn ping(&self) -> TaskplaneResult<()> {
        self.check_reachable()
    }

    async fn task(&self, task_id: TaskId) -> TaskplaneResult<Option<Task>> {
        self.check_reachable()?;
        Ok(self.state.lock().await.tasks.get(&task_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use taskplane_core::{Clock, ManualClock};

    const LEASE: Duration = Duration::from_secs(30);

    fn broker_with_clock() -> (InMemoryBroker, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let broker = InMemoryBroker::with_config(
            InMemoryBrokerConfig::default(),
            Arc::new(clock.clone()),
        );
        (broker, clock)
    }

    #[tokio::test]
    async fn test_enqueue_and_lease_fifo() {
        let (broker, _clock) = broker_with_clock();
        let first = broker.enqueue(Task::new("a", Value::Null)).await.unwrap();
        let second = broker.enqueue(Task::new("b", Value::Null)).await.unwrap();
        assert_eq!(broker.queue_depth().await.unwrap(), 2);

        let lease = broker.lease("w1", LEASE).await.unwrap().unwrap();
        assert_eq!(lease.task_id(), first);
        assert_eq!(lease.task.state, TaskState::Leased);
        let lease = broker.lease("w1", LEASE).await.unwrap().unwrap();
        assert_eq!(lease.task_id(), second);
        assert!(broker.lease("w1", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_priority_before_fifo() {
        let (broker, _clock) = broker_with_clock();
        broker.enqueue(Task::new("low", Value::Null)).await.unwrap();
        let urgent = broker
            .enqueue(Task::new("high", Value::Null).with_priority(9))
            .await
            .unwrap();

        let lease = broker.lease("w1", LEASE).await.unwrap().unwrap();
        assert_eq!(lease.task_id(), urgent);
    }

    #[tokio::test]
    async fn test_eta_is_respected() {
        let (broker, clock) = broker_with_clock();
        let eta = clock.now() + chrono::Duration::seconds(60);
        broker
            .enqueue(Task::new("later", Value::Null).with_eta(eta))
            .await
            .unwrap();

        assert!(broker.lease("w1", LEASE).await.unwrap().is_none());
        clock.advance_secs(60);
        assert!(broker.lease("w1", LEASE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ack_completes_task() {
        let (broker, _clock) = broker_with_clock();
        let id = broker.enqueue(Task::new("a", Value::Null)).await.unwrap();
        let lease = broker.lease("w1", LEASE).await.unwrap().unwrap();
        broker.ack(&lease).await.unwrap();

        let task = broker.task(id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(broker.queue_depth().await.unwrap(), 0);
        // 重复确认不再持有租约
        assert!(matches!(
            broker.ack(&lease).await,
            Err(TaskplaneError::LeaseNotHeld { .. })
        ));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_expired_lease_is_redelivered() {
        let (broker, clock) = broker_with_clock();
        let id = broker.enqueue(Task::new("a", Value::Null)).await.unwrap();
        broker.lease("w1", LEASE).await.unwrap().unwrap();
        assert!(broker.lease("w2", LEASE).await.unwrap().is_none());

        clock.advance_secs(31);
        let lease = broker.lease("w2", LEASE).await.unwrap().unwrap();
        assert_eq!(lease.task_id(), id);
        assert_eq!(lease.worker_id, "w2");
        assert_eq!(lease.task.attempt_count, 0);
        assert!(logs_contain("租约过期"));
    }

    #[tokio::test]
    async fn test_extend_pushes_out_expiry() {
        let (broker, clock) = broker_with_clock();
        broker.enqueue(Task::new("a", Value::Null)).await.unwrap();
        let lease = broker.lease("w1", LEASE).await.unwrap().unwrap();
        clock.advance_secs(20);
        let expires_at = broker.extend(&lease, LEASE).await.unwrap();
        assert_eq!(expires_at, clock.now() + chrono::Duration::seconds(30));
        clock.advance_secs(20);
        assert_eq!(broker.reap_expired().await, 0);
        clock.advance_secs(11);
        assert_eq!(broker.reap_expired().await, 1);
    }

    #[tokio::test]
    async fn test_nack_retry_and_dead_letter() {
        let (broker, clock) = broker_with_clock();
        let id = broker
            .enqueue(Task::new("flaky", Value::Null).with_max_retries(1))
            .await
            .unwrap();

        let lease = broker.lease("w1", LEASE).await.unwrap().unwrap();
        broker
            .nack(
                &lease,
                Requeue::Retry {
                    delay: Duration::from_secs(5),
                    error: "boom".to_string(),
                },
            )
            .await
            .unwrap();
        let task = broker.task(id).await.unwrap().unwrap();
        assert_eq!(task.attempt_count, 1);
        assert_eq!(task.last_error.as_deref(), Some("boom"));
        assert!(broker.lease("w1", LEASE).await.unwrap().is_none());

        clock.advance_secs(5);
        let lease = broker.lease("w1", LEASE).await.unwrap().unwrap();
        broker
            .nack(
                &lease,
                Requeue::DeadLetter {
                    reason: "boom again".to_string(),
                },
            )
            .await
            .unwrap();
        let task = broker.task(id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.attempt_count, 2);
        assert_eq!(broker.queue_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_release_does_not_count_attempt() {
        let (broker, _clock) = broker_with_clock();
        let id = broker.enqueue(Task::new("a", Value::Null)).await.unwrap();
        let lease = broker.lease("w1", LEASE).await.unwrap().unwrap();
        broker.release(&lease).await.unwrap();

        let lease = broker.lease("w2", LEASE).await.unwrap().unwrap();
        assert_eq!(lease.task_id(), id);
        assert_eq!(lease.task.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_stale_holder_cannot_settle_after_redelivery() {
        let (broker, clock) = broker_with_clock();
        let id = broker.enqueue(Task::new("a", Value::Null)).await.unwrap();
        let stale = broker.lease("w1", LEASE).await.unwrap().unwrap();

        clock.advance_secs(31);
        let current = broker.lease("w2", LEASE).await.unwrap().unwrap();
        assert_ne!(stale.token, current.token);

        let retry = Requeue::Retry {
            delay: Duration::ZERO,
            error: "late failure".to_string(),
        };
        assert!(matches!(
            broker.nack(&stale, retry).await,
            Err(TaskplaneError::LeaseNotHeld { .. })
        ));
        assert!(matches!(
            broker.ack(&stale).await,
            Err(TaskplaneError::LeaseNotHeld { .. })
        ));
        assert!(matches!(
            broker.release(&stale).await,
            Err(TaskplaneError::LeaseNotHeld { .. })
        ));
        assert!(matches!(
            broker.extend(&stale, LEASE).await,
            Err(TaskplaneError::LeaseNotHeld { .. })
        ));

        // 当前持有者不受影响
        assert!(broker.lease("w3", LEASE).await.unwrap().is_none());
        let task = broker.task(id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Leased);
        assert_eq!(task.attempt_count, 0);
        broker.ack(&current).await.unwrap();
        assert_eq!(
            broker.task(id).await.unwrap().unwrap().state,
            TaskState::Completed
        );
    }

    #[tokio::test]
    async fn test_lease_token_changes_on_redelivery_to_same_worker() {
        let (broker, clock) = broker_with_clock();
        broker.enqueue(Task::new("a", Value::Null)).await.unwrap();
        let first = broker.lease("w1", LEASE).await.unwrap().unwrap();
        clock.advance_secs(31);
        let second = broker.lease("w1", LEASE).await.unwrap().unwrap();

        assert!(matches!(
            broker.ack(&first).await,
            Err(TaskplaneError::LeaseNotHeld { .. })
        ));
        broker.ack(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lease_cannot_be_extended() {
        let (broker, clock) = broker_with_clock();
        broker.enqueue(Task::new("a", Value::Null)).await.unwrap();
        let lease = broker.lease("w1", LEASE).await.unwrap().unwrap();
        clock.advance_secs(31);

        assert!(matches!(
            broker.extend(&lease, LEASE).await,
            Err(TaskplaneError::LeaseNotHeld { .. })
        ));
        assert_eq!(broker.queue_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_broker() {
        let (broker, _clock) = broker_with_clock();
        broker.set_reachable(false);
        assert!(matches!(
            broker.ping().await,
            Err(TaskplaneError::BrokerUnavailable(_))
        ));
        assert!(broker.enqueue(Task::new("a", Value::Null)).await.is_err());
        broker.set_reachable(true);
        assert!(broker.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let (broker, _clock) = broker_with_clock();
        let id = uuid::Uuid::new_v4();
        let now = Utc::now();
        let mut task = Task::new("ghost", Value::Null);
        task.id = id;
        let lease = Lease {
            task,
            worker_id: "w1".to_string(),
            token: 1,
            leased_at: now,
            expires_at: now,
        };
        assert!(matches!(
            broker.ack(&lease).await,
            Err(TaskplaneError::TaskNotFound { .. })
        ));
        assert!(broker.task(id).await.unwrap().is_none());
    }
}
