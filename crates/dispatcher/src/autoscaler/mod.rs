//! 自动扩缩容
//!
//! [`ScalingRecommender`] 是纯计算部分，输入当前副本数与利用率样本，输出期望副本数；
//! [`Autoscaler`] 周期性拉取样本并把结果发布给扩缩容对象。

mod controller;
mod recommender;

pub use controller::Autoscaler;
pub use recommender::{DecisionReason, ScalingDecision, ScalingRecommender};
