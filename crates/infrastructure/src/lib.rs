//! 控制平面的基础设施实现
//!
//! - `memory`：内存任务队列、周期任务存储与领导锁
//! - `sqlite`：基于sqlx的周期任务存储与领导锁
//! - `observability`：日志、Prometheus指标与利用率采样

pub mod factory;
pub mod memory;
pub mod observability;
pub mod sqlite;

pub use factory::{BeatStores, BrokerFactory, StoreFactory};
pub use memory::{InMemoryBroker, InMemoryBrokerConfig, InMemoryLeaderLock, InMemoryScheduleStore};
pub use observability::{
    init_structured_logging, install_prometheus_recorder, HttpMetricsSource, LogFormat,
    LoggingConfig, MetricsCollector, MetricsExporter, UtilizationSource,
};
pub use sqlite::{SqliteLeaderLock, SqliteScheduleStore};
