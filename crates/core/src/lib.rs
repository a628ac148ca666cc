//! Taskplane 核心定义
//!
//! 包含控制平面各组件共享的领域模型、错误类型、端口(trait)与配置。
//! 具体实现位于 infrastructure / worker / dispatcher 等crate中。

pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::AppConfig;
pub use errors::*;
pub use models::{
    Cadence, Lease, PoolStats, Requeue, ScheduleEntry, ScalingPolicy, Task, TaskId, TaskState,
    UtilizationSample, DEFAULT_MAX_RETRIES,
};
pub use traits::{
    LeaderLock, LockLease, MetricsSource, PoolStatsProvider, ScaleTarget, ScheduleStore,
    TaskBroker,
};

/// 统一的Result类型
pub type TaskplaneResult<T> = std::result::Result<T, TaskplaneError>;
