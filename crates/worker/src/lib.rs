//! Worker池
//!
//! 每个Worker实例从队列租用任务，在固定数量的执行槽中运行处理器，
//! 成功后确认（acks-late），失败时按退避策略重试或进入死信。
//! [`WorkerPool`] 根据期望副本数增减实例，每个实例都需要先通过资源准入。

pub mod dedup;
pub mod events;
pub mod handler;
pub mod health;
pub mod pool;
pub mod retry;
pub mod worker;

pub use dedup::DedupHandler;
pub use events::TaskEvent;
pub use handler::{handler_fn, HandlerRegistry, HandlerSet, TaskHandler};
pub use health::{HealthCheck, HealthReport};
pub use pool::{PoolSettings, WorkerPool};
pub use retry::RetryPolicy;
pub use worker::{Worker, WorkerHandle, WorkerSettings};
