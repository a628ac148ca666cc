pub mod metrics;
pub mod resources;
pub mod scaling;
pub mod schedule;
pub mod task;

pub use metrics::{PoolStats, UtilizationSample};
pub use resources::{
    CpuQuantity, InstanceKind, LimitRange, MemoryQuantity, NamespaceUsage, ResourceQuota,
    ResourceSpec, Resources,
};
pub use scaling::{PolicyKind, ScalingBehavior, ScalingPolicy, ScalingRule, SelectPolicy};
pub use schedule::{Cadence, ScheduleEntry};
pub use task::{Lease, Requeue, Task, TaskId, TaskState, DEFAULT_MAX_RETRIES};
