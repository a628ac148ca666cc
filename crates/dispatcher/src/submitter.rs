use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde_json::Value;
use tracing::debug;

use taskplane_core::{Task, TaskBroker, TaskId, TaskplaneError, TaskplaneResult, DEFAULT_MAX_RETRIES};

/// 任务投递入口
///
/// 调用方同步得到成功（任务ID）或失败；之后的执行过程只通过事件与指标观察。
#[derive(Clone)]
pub struct TaskSubmitter {
    broker: Arc<dyn TaskBroker>,
}

impl TaskSubmitter {
    pub fn new(broker: Arc<dyn TaskBroker>) -> Self {
        Self { broker }
    }

    pub async fn enqueue(
        &self,
        name: &str,
        args: Value,
        eta: Option<DateTime<Utc>>,
    ) -> TaskplaneResult<TaskId> {
        self.submit(name, args, eta, DEFAULT_MAX_RETRIES, 0).await
    }

    pub async fn submit(
        &self,
        name: &str,
        args: Value,
        eta: Option<DateTime<Utc>>,
        max_retries: u32,
        priority: u8,
    ) -> TaskplaneResult<TaskId> {
        if name.trim().is_empty() {
            return Err(TaskplaneError::InvalidTaskParams(
                "任务名不能为空".to_string(),
            ));
        }
        let mut task = Task::new(name, args)
            .with_max_retries(max_retries)
            .with_priority(priority);
        if let Some(eta) = eta {
            task = task.with_eta(eta);
        }
        let id = self.broker.enqueue(task).await?;
        counter!("taskplane_tasks_submitted_total", "task" => name.to_string()).increment(1);
        debug!(task_id = %id, task = name, "任务已投递");
        Ok(id)
    }

    pub async fn status(&self, task_id: TaskId) -> TaskplaneResult<Task> {
        self.broker
            .task(task_id)
            .await?
            .ok_or(TaskplaneError::TaskNotFound { id: task_id })
    }
}
