//! 调度侧组件
//!
//! - [`BeatScheduler`]：通过领导选举保证单实例运行的周期任务调度器
//! - [`Autoscaler`]：读取利用率样本并调整Worker池的期望副本数
//! - [`TaskSubmitter`]：供应用代码投递任务

pub mod autoscaler;
pub mod beat;
pub mod leader;
pub mod submitter;

pub use autoscaler::{Autoscaler, DecisionReason, ScalingDecision, ScalingRecommender};
pub use beat::{BeatScheduler, BeatSettings, BeatStatus, BeatStatusHandle, EntryStatus};
pub use leader::{LeaderElector, Role};
pub use submitter::TaskSubmitter;
