pub mod broker;
pub mod leader;
pub mod metrics_source;
pub mod scale_target;
pub mod schedule_store;

pub use broker::TaskBroker;
pub use leader::{LeaderLock, LockLease};
pub use metrics_source::{MetricsSource, PoolStatsProvider};
pub use scale_target::ScaleTarget;
pub use schedule_store::ScheduleStore;
