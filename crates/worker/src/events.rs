use std::time::Duration;

use serde::Serialize;
use taskplane_core::TaskId;

/// 任务生命周期事件，通过broadcast通道发布
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Completed {
        task_id: TaskId,
        name: String,
        worker_id: String,
    },
    Retrying {
        task_id: TaskId,
        name: String,
        /// 已失败的次数
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// 终态失败：重试耗尽或没有对应的处理器
    Failed {
        task_id: TaskId,
        name: String,
        attempts: u32,
        error: String,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::Completed { task_id, .. }
            | TaskEvent::Retrying { task_id, .. }
            | TaskEvent::Failed { task_id, .. } => *task_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskEvent::Retrying { .. })
    }
}
