use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{TaskplaneError, TaskplaneResult};

/// 扩缩容步长类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// 按当前副本数的百分比
    Percent,
    /// 按绝对副本数
    #[serde(alias = "absolute_pods")]
    Pods,
}

/// 单条步长限制：在 `period_seconds` 内最多变化 `value`（百分比或副本数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScalingRule {
    pub kind: PolicyKind,
    pub value: u32,
    pub period_seconds: u64,
}

impl ScalingRule {
    pub fn percent(value: u32, period_seconds: u64) -> Self {
        Self {
            kind: PolicyKind::Percent,
            value,
            period_seconds,
        }
    }

    pub fn pods(value: u32, period_seconds: u64) -> Self {
        Self {
            kind: PolicyKind::Pods,
            value,
            period_seconds,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_seconds)
    }
}

/// 同方向存在多条规则时的选择方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectPolicy {
    /// 选择变化量最大的规则
    Max,
    /// 选择变化量最小的规则
    Min,
    /// 禁止该方向的扩缩容
    Disabled,
}

/// 单个方向（扩容或缩容）的行为
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingBehavior {
    pub stabilization_window_seconds: u64,
    pub select_policy: SelectPolicy,
    pub policies: Vec<ScalingRule>,
}

impl ScalingBehavior {
    pub fn stabilization_window(&self) -> Duration {
        Duration::from_secs(self.stabilization_window_seconds)
    }

    /// 所有规则中最长的统计周期，用于裁剪扩缩容历史
    pub fn longest_period(&self) -> Duration {
        self.policies
            .iter()
            .map(ScalingRule::period)
            .max()
            .unwrap_or_default()
    }
}

/// 自动扩缩容策略（启动后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_utilization_percent: f64,
    /// 利用率比值落在 `1 ± tolerance` 内时不调整
    pub tolerance: f64,
    pub scale_up: ScalingBehavior,
    pub scale_down: ScalingBehavior,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 10,
            target_utilization_percent: 70.0,
            tolerance: 0.1,
            scale_up: ScalingBehavior {
                stabilization_window_seconds: 0,
                select_policy: SelectPolicy::Max,
                policies: vec![ScalingRule::percent(100, 15), ScalingRule::pods(4, 15)],
            },
            scale_down: ScalingBehavior {
                stabilization_window_seconds: 300,
                select_policy: SelectPolicy::Min,
                policies: vec![ScalingRule::percent(10, 60)],
            },
        }
    }
}

impl ScalingPolicy {
    pub fn validate(&self) -> TaskplaneResult<()> {
        if self.min_replicas == 0 {
            return Err(TaskplaneError::Configuration(
                "min_replicas must be at least 1".to_string(),
            ));
        }
        if self.min_replicas > self.max_replicas {
            return Err(TaskplaneError::Configuration(format!(
                "min_replicas ({}) must not exceed max_replicas ({})",
                self.min_replicas, self.max_replicas
            )));
        }
        if !(self.target_utilization_percent > 0.0 && self.target_utilization_percent <= 100.0) {
            return Err(TaskplaneError::Configuration(format!(
                "target_utilization_percent must be in (0, 100], got {}",
                self.target_utilization_percent
            )));
        }
        if !(0.0..1.0).contains(&self.tolerance) {
            return Err(TaskplaneError::Configuration(format!(
                "tolerance must be in [0, 1), got {}",
                self.tolerance
            )));
        }
        for (direction, behavior) in [("scale_up", &self.scale_up), ("scale_down", &self.scale_down)] {
            if behavior.select_policy != SelectPolicy::Disabled && behavior.policies.is_empty() {
                return Err(TaskplaneError::Configuration(format!(
                    "{direction} requires at least one policy unless select_policy is disabled"
                )));
            }
            for rule in &behavior.policies {
                if rule.value == 0 || rule.period_seconds == 0 {
                    return Err(TaskplaneError::Configuration(format!(
                        "{direction} policy value and period must be greater than 0"
                    )));
                }
                if direction == "scale_down" && rule.kind == PolicyKind::Percent && rule.value > 100 {
                    return Err(TaskplaneError::Configuration(
                        "scale_down percent policy cannot exceed 100".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn clamp(&self, replicas: u32) -> u32 {
        replicas.clamp(self.min_replicas, self.max_replicas)
    }
}
