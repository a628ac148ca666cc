use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use taskplane_core::{Task, TaskId, TaskplaneError, TaskplaneResult};
use tracing::{debug, warn};

use crate::handler::TaskHandler;

/// 已完成任务ID的有界集合，超出容量时淘汰最早的记录；同时记录正在执行的任务ID
#[derive(Debug)]
struct CompletedIds {
    ids: HashSet<TaskId>,
    order: VecDeque<TaskId>,
    capacity: usize,
    in_flight: HashSet<TaskId>,
}

impl CompletedIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            in_flight: HashSet::new(),
        }
    }

    fn insert(&mut self, id: TaskId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }
}

/// 幂等包装：同一个任务ID成功执行过一次后，重复投递直接跳过
///
/// 记录在所有克隆之间共享，可以在处理器工厂里为每个执行槽包一层。
pub struct DedupHandler<H> {
    inner: H,
    completed: Arc<Mutex<CompletedIds>>,
}

impl<H> DedupHandler<H> {
    pub fn new(inner: H, capacity: usize) -> Self {
        Self {
            inner,
            completed: Arc::new(Mutex::new(CompletedIds::new(capacity))),
        }
    }

    /// 用同一份完成记录包装另一个处理器实例
    pub fn share<I>(&self, inner: I) -> DedupHandler<I> {
        DedupHandler {
            inner,
            completed: Arc::clone(&self.completed),
        }
    }

    pub fn is_completed(&self, task_id: TaskId) -> bool {
        self.lock().ids.contains(&task_id)
    }

    pub fn is_in_flight(&self, task_id: TaskId) -> bool {
        self.lock().in_flight.contains(&task_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CompletedIds> {
        lock_ids(&self.completed)
    }
}

fn lock_ids(ids: &Mutex<CompletedIds>) -> std::sync::MutexGuard<'_, CompletedIds> {
    ids.lock().unwrap_or_else(|e| e.into_inner())
}

/// 执行期间占用任务ID；成功时转为已完成，失败、超时取消或panic时只释放占用
struct InFlightGuard<'a> {
    ids: &'a Mutex<CompletedIds>,
    task_id: TaskId,
}

impl InFlightGuard<'_> {
    fn complete(self) {
        lock_ids(self.ids).insert(self.task_id);
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock_ids(self.ids).in_flight.remove(&self.task_id);
    }
}

#[async_trait]
impl<H: TaskHandler> TaskHandler for DedupHandler<H> {
    async fn handle(&self, task: &Task) -> TaskplaneResult<Value> {
        let guard = {
            let mut ids = self.lock();
            if ids.ids.contains(&task.id) {
                debug!(task_id = %task.id, task = %task.name, "任务已执行过，跳过重复投递");
                return Ok(Value::Null);
            }
            if !ids.in_flight.insert(task.id) {
                warn!(task_id = %task.id, task = %task.name, "同一任务正在执行，本次投递稍后重试");
                return Err(TaskplaneError::TaskInFlight { id: task.id });
            }
            InFlightGuard {
                ids: &self.completed,
                task_id: task.id,
            }
        };

        let output = self.inner.handle(task).await?;
        guard.complete();
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_duplicate_delivery_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handler = DedupHandler::new(
            handler_fn(move |_task: Task| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            }),
            16,
        );

        let task = Task::new("send_email", Value::Null);
        handler.handle(&task).await.unwrap();
        handler.handle(&task).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        handler.handle(&Task::new("send_email", Value::Null)).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_execution_is_not_recorded() {
        let handler = DedupHandler::new(
            handler_fn(|_task: Task| async {
                Err(taskplane_core::TaskplaneError::TaskExecution("smtp down".into()))
            }),
            16,
        );
        let task = Task::new("send_email", Value::Null);
        assert!(handler.handle(&task).await.is_err());
        assert!(!handler.is_completed(task.id));
    }

    #[tokio::test]
    async fn test_shared_record_across_instances() {
        let first = DedupHandler::new(handler_fn(|_t: Task| async { Ok(Value::Null) }), 2);
        let second = first.share(handler_fn(|_t: Task| async {
            Err(taskplane_core::TaskplaneError::Internal("should be skipped".into()))
        }));

        let task = Task::new("a", Value::Null);
        first.handle(&task).await.unwrap();
        assert!(second.handle(&task).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_is_rejected_while_in_flight() {
        let runs = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(tokio::sync::Notify::new());
        let finish = Arc::new(tokio::sync::Notify::new());
        let handler = {
            let (runs, started, finish) = (runs.clone(), started.clone(), finish.clone());
            Arc::new(DedupHandler::new(
                handler_fn(move |_task: Task| {
                    let (runs, started, finish) = (runs.clone(), started.clone(), finish.clone());
                    async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        started.notify_one();
                        finish.notified().await;
                        Ok(Value::Null)
                    }
                }),
                16,
            ))
        };

        let task = Task::new("charge_card", Value::Null);
        let first = {
            let (handler, task) = (handler.clone(), task.clone());
            tokio::spawn(async move { handler.handle(&task).await })
        };
        started.notified().await;
        assert!(handler.is_in_flight(task.id));

        let duplicate = handler.share(handler_fn(|_t: Task| async {
            Err(taskplane_core::TaskplaneError::Internal("should not run".into()))
        }));
        assert!(matches!(
            duplicate.handle(&task).await,
            Err(TaskplaneError::TaskInFlight { .. })
        ));

        finish.notify_one();
        first.await.unwrap().unwrap();
        assert!(!handler.is_in_flight(task.id));
        assert!(handler.is_completed(task.id));
        // 完成后的重复投递直接跳过
        assert!(duplicate.handle(&task).await.is_ok());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_execution_releases_in_flight() {
        let handler = DedupHandler::new(
            handler_fn(|_task: Task| async {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok(Value::Null)
            }),
            16,
        );
        let task = Task::new("slow", Value::Null);
        let outcome =
            tokio::time::timeout(std::time::Duration::from_millis(20), handler.handle(&task)).await;
        assert!(outcome.is_err());
        assert!(!handler.is_in_flight(task.id));
        assert!(!handler.is_completed(task.id));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut ids = CompletedIds::new(2);
        let (a, b, c) = (TaskId::new_v4(), TaskId::new_v4(), TaskId::new_v4());
        ids.insert(a);
        ids.insert(b);
        ids.insert(c);
        assert!(!ids.ids.contains(&a));
        assert!(ids.ids.contains(&b) && ids.ids.contains(&c));
    }
}
