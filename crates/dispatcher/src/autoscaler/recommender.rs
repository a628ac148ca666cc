use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

use taskplane_core::models::{PolicyKind, ScalingBehavior, SelectPolicy};
use taskplane_core::{ScalingPolicy, UtilizationSample};

/// 决策原因，同时用作日志字段和指标标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    BelowMin,
    AboveMax,
    WithinTolerance,
    ScaleUp,
    ScaleDown,
    /// 稳定窗口内的历史推荐抵消了本次变化
    Stabilized,
    /// 变化量被步长规则截断
    LimitedByPolicy,
    /// 该方向的扩缩容被禁用
    DirectionDisabled,
}

impl DecisionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionReason::BelowMin => "below_min",
            DecisionReason::AboveMax => "above_max",
            DecisionReason::WithinTolerance => "within_tolerance",
            DecisionReason::ScaleUp => "scale_up",
            DecisionReason::ScaleDown => "scale_down",
            DecisionReason::Stabilized => "stabilized",
            DecisionReason::LimitedByPolicy => "limited_by_policy",
            DecisionReason::DirectionDisabled => "direction_disabled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingDecision {
    pub current: u32,
    /// 只按利用率计算出的副本数
    pub recommended: u32,
    pub desired: u32,
    pub utilization_ratio: f64,
    pub reason: DecisionReason,
}

impl ScalingDecision {
    pub fn changed(&self) -> bool {
        self.desired != self.current
    }
}

#[derive(Debug, Clone, Copy)]
struct Recommendation {
    at: DateTime<Utc>,
    replicas: u32,
}

#[derive(Debug, Clone, Copy)]
struct ScaleEvent {
    at: DateTime<Utc>,
    from: u32,
    to: u32,
}

/// 副本数推荐
///
/// 计算方式：
/// 1. `ratio = max(cpu, memory) / target`，`|ratio - 1| <= tolerance` 时不变，
///    否则 `ceil(current * ratio)`；
/// 2. 稳定窗口：扩容取扩容窗口内的最高推荐，缩容取缩容窗口内的最高推荐，
///    所以窗口内只要出现过高负载就不会缩容；
/// 3. 步长规则：统计周期内已发生的变化计入限额，多条规则按 `select_policy` 选择；
/// 4. 最终结果始终落在 `[min_replicas, max_replicas]` 内。
#[derive(Debug)]
pub struct ScalingRecommender {
    policy: ScalingPolicy,
    recommendations: VecDeque<Recommendation>,
    events: VecDeque<ScaleEvent>,
}

fn to_chrono(d: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::days(365))
}

impl ScalingRecommender {
    pub fn new(policy: ScalingPolicy) -> Self {
        Self {
            policy,
            recommendations: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> &ScalingPolicy {
        &self.policy
    }

    /// 利用率与目标值之比，内存只在上报值大于0时参与
    pub fn utilization_ratio(&self, sample: &UtilizationSample) -> f64 {
        let target = self.policy.target_utilization_percent;
        let cpu = sample.avg_cpu_percent / target;
        if sample.avg_memory_percent > 0.0 {
            cpu.max(sample.avg_memory_percent / target)
        } else {
            cpu
        }
    }

    pub fn recommend(
        &mut self,
        now: DateTime<Utc>,
        current: u32,
        sample: &UtilizationSample,
    ) -> ScalingDecision {
        let ratio = self.utilization_ratio(sample);

        // 副本数超出边界时直接纠正，不经过稳定窗口与步长规则
        if current < self.policy.min_replicas || current > self.policy.max_replicas {
            let desired = self.policy.clamp(current);
            let reason = if current < self.policy.min_replicas {
                DecisionReason::BelowMin
            } else {
                DecisionReason::AboveMax
            };
            self.record_event(now, current, desired);
            return ScalingDecision {
                current,
                recommended: desired,
                desired,
                utilization_ratio: ratio,
                reason,
            };
        }

        let within_tolerance = (ratio - 1.0).abs() <= self.policy.tolerance;
        let recommended = if within_tolerance {
            current
        } else {
            let raw = (f64::from(current) * ratio).ceil();
            self.policy.clamp(raw.min(f64::from(u32::MAX)) as u32)
        };

        self.record_recommendation(now, recommended);
        let stabilized = self.stabilize(now, current);

        let (desired, reason) = if stabilized > current {
            self.limit(now, current, stabilized, true)
        } else if stabilized < current {
            self.limit(now, current, stabilized, false)
        } else if recommended != current {
            (current, DecisionReason::Stabilized)
        } else if within_tolerance {
            (current, DecisionReason::WithinTolerance)
        } else {
            (current, DecisionReason::Stabilized)
        };

        let desired = self.policy.clamp(desired);
        self.record_event(now, current, desired);
        self.prune(now);

        ScalingDecision {
            current,
            recommended,
            desired,
            utilization_ratio: ratio,
            reason,
        }
    }

    fn record_recommendation(&mut self, now: DateTime<Utc>, replicas: u32) {
        self.recommendations.push_back(Recommendation { at: now, replicas });
    }

    fn record_event(&mut self, now: DateTime<Utc>, from: u32, to: u32) {
        if from != to {
            self.events.push_back(ScaleEvent { at: now, from, to });
        }
    }

    /// 扩容与缩容都取各自窗口内的最高推荐
    fn stabilize(&self, now: DateTime<Utc>, current: u32) -> u32 {
        let highest_within = |window: std::time::Duration| {
            let since = now - to_chrono(window);
            self.recommendations
                .iter()
                .filter(|r| r.at >= since)
                .map(|r| r.replicas)
                .max()
        };

        let up = highest_within(self.policy.scale_up.stabilization_window()).unwrap_or(current);
        if up > current {
            return up;
        }
        let down = highest_within(self.policy.scale_down.stabilization_window()).unwrap_or(current);
        if down < current {
            return down;
        }
        current
    }

    /// 按步长规则限制变化量
    fn limit(&self, now: DateTime<Utc>, current: u32, target: u32, up: bool) -> (u32, DecisionReason) {
        let behavior: &ScalingBehavior = if up {
            &self.policy.scale_up
        } else {
            &self.policy.scale_down
        };
        if behavior.select_policy == SelectPolicy::Disabled {
            return (current, DecisionReason::DirectionDisabled);
        }

        let limits = behavior.policies.iter().map(|rule| {
            let since = now - to_chrono(rule.period());
            let (added, removed) = self
                .events
                .iter()
                .filter(|event| event.at > since)
                .fold((0i64, 0i64), |(added, removed), event| {
                    let delta = i64::from(event.to) - i64::from(event.from);
                    if delta > 0 {
                        (added + delta, removed)
                    } else {
                        (added, removed - delta)
                    }
                });
            // 周期开始时的副本数
            let start = if up {
                (i64::from(current) - added).max(0)
            } else {
                i64::from(current) + removed
            };
            let value = i64::from(rule.value);
            match (rule.kind, up) {
                (PolicyKind::Percent, true) => ((start * (100 + value)) as f64 / 100.0).ceil() as i64,
                (PolicyKind::Pods, true) => start + value,
                (PolicyKind::Percent, false) => ((start * (100 - value)) as f64 / 100.0).floor() as i64,
                (PolicyKind::Pods, false) => start - value,
            }
        });

        // Max 选择变化量最大的规则：扩容取最大上限，缩容取最小下限
        let bound = match (behavior.select_policy, up) {
            (SelectPolicy::Max, true) | (SelectPolicy::Min, false) => limits.max(),
            (SelectPolicy::Min, true) | (SelectPolicy::Max, false) => limits.min(),
            (SelectPolicy::Disabled, _) => None,
        };
        let Some(bound) = bound else {
            let reason = if up { DecisionReason::ScaleUp } else { DecisionReason::ScaleDown };
            return (target, reason);
        };
        let bound = bound.clamp(0, i64::from(u32::MAX)) as u32;

        if up {
            let bound = bound.max(current);
            if target > bound {
                (bound, DecisionReason::LimitedByPolicy)
            } else {
                (target, DecisionReason::ScaleUp)
            }
        } else {
            let bound = bound.min(current);
            if target < bound {
                (bound, DecisionReason::LimitedByPolicy)
            } else {
                (target, DecisionReason::ScaleDown)
            }
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let window = self
            .policy
            .scale_up
            .stabilization_window()
            .max(self.policy.scale_down.stabilization_window());
        let since = now - to_chrono(window);
        while self.recommendations.front().is_some_and(|r| r.at < since) {
            self.recommendations.pop_front();
        }

        let period = self
            .policy
            .scale_up
            .longest_period()
            .max(self.policy.scale_down.longest_period());
        let since = now - to_chrono(period);
        while self.events.front().is_some_and(|e| e.at <= since) {
            self.events.pop_front();
        }
    }
}
