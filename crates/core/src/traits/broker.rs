use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Lease, Requeue, Task, TaskId};
use crate::TaskplaneResult;

/// 任务队列抽象接口
///
/// 要求至少一次投递：租约过期未确认的任务会自动回到Pending，
/// 同一优先级内按先进先出顺序租出。
/// 结算类操作以租约为凭据：租约过期后被重新租出时，旧持有者的操作返回
/// [`crate::TaskplaneError::LeaseNotHeld`]。
#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// 投递任务，返回任务ID
    async fn enqueue(&self, task: Task) -> TaskplaneResult<TaskId>;

    /// 为Worker租用下一个可执行的任务，没有任务时返回 `None`
    async fn lease(&self, worker_id: &str, timeout: Duration) -> TaskplaneResult<Option<Lease>>;

    /// 从现在起把租约延长 `timeout`，返回新的到期时间
    async fn extend(&self, lease: &Lease, timeout: Duration) -> TaskplaneResult<DateTime<Utc>>;

    /// 确认任务执行成功
    async fn ack(&self, lease: &Lease) -> TaskplaneResult<()>;

    /// 拒绝任务：重试或进入死信
    async fn nack(&self, lease: &Lease, requeue: Requeue) -> TaskplaneResult<()>;

    /// 归还尚未开始执行的任务，不计入尝试次数
    async fn release(&self, lease: &Lease) -> TaskplaneResult<()>;

    /// 等待租用的任务数量
    async fn queue_depth(&self) -> TaskplaneResult<u64>;

    /// 连通性检查
    async fn ping(&self) -> TaskplaneResult<()>;

    /// 查询任务当前状态
    async fn task(&self, task_id: TaskId) -> TaskplaneResult<Option<Task>>;
}
