//! 资源准入控制
//!
//! 在创建Worker或Beat调度器实例之前，按命名空间的 [`ResourceQuota`] 与
//! [`LimitRange`] 校验其声明的资源形状。通过校验的请求以 [`Reservation`]
//! 的形式占用配额，Reservation 被丢弃时自动归还。

mod admission;
mod reservation;

pub use admission::{Governor, ResolvedResources};
pub use reservation::Reservation;
pub use taskplane_core::models::{
    CpuQuantity, InstanceKind, LimitRange, MemoryQuantity, NamespaceUsage, ResourceQuota,
    ResourceSpec, Resources,
};
pub use taskplane_core::AdmissionError;
