use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type TaskId = Uuid;

/// 任务默认的最大重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 任务状态
///
/// `Completed` 与 `Failed` 为终态，进入后不再变化。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Leased,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Leased => "leased",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

/// 提交给控制平面异步执行的工作单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    /// 不透明的任务参数
    pub args: Value,
    /// 最早可执行时间
    pub eta: Option<DateTime<Utc>>,
    /// 处理器失败次数
    pub attempt_count: u32,
    pub max_retries: u32,
    /// 优先级，数值越大越先执行
    pub priority: u8,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Task {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            args,
            eta: None,
            attempt_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            priority: 0,
            state: TaskState::Pending,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// 本次失败之后是否还允许重试
    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_retries
    }

    /// 是否处于可被租用的状态
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Pending && self.eta.map_or(true, |eta| eta <= now)
    }
}

/// 任务租约：在限定时间内把任务绑定到某个Worker
///
/// `token` 在每次租出时递增，确认、拒绝、续约与归还都必须携带当前有效的租约。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub task: Task,
    pub worker_id: String,
    pub token: u64,
    pub leased_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// nack 的处理方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requeue {
    /// 处理失败，计入一次尝试并在延迟后重新投递
    Retry { delay: Duration, error: String },
    /// 终态失败，从队列移除并记录为 Failed
    DeadLetter { reason: String },
}
