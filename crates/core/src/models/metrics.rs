use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker池的执行槽状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub worker_count: u32,
    pub active_tasks: u32,
    pub total_slots: u32,
}

/// 某个Worker池在一个采样周期内的利用率快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub timestamp: DateTime<Utc>,
    pub namespace: String,
    pub pool: String,
    pub worker_count: u32,
    pub active_tasks: u32,
    pub total_slots: u32,
    pub avg_cpu_percent: f64,
    pub avg_memory_percent: f64,
    pub queue_depth: u64,
}

impl UtilizationSample {
    /// 当前空闲的执行槽数量
    pub fn free_slots(&self) -> u32 {
        self.total_slots.saturating_sub(self.active_tasks)
    }

    /// 执行槽占用率（百分比）
    pub fn slot_utilization_percent(&self) -> f64 {
        if self.total_slots == 0 {
            return 0.0;
        }
        f64::from(self.active_tasks) * 100.0 / f64::from(self.total_slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_utilization() {
        let sample = UtilizationSample {
            timestamp: Utc::now(),
            namespace: "default".to_string(),
            pool: "default".to_string(),
            worker_count: 2,
            active_tasks: 3,
            total_slots: 8,
            avg_cpu_percent: 0.0,
            avg_memory_percent: 0.0,
            queue_depth: 12,
        };
        assert_eq!(sample.free_slots(), 5);
        assert!((sample.slot_utilization_percent() - 37.5).abs() < f64::EPSILON);

        let idle = UtilizationSample {
            total_slots: 0,
            active_tasks: 0,
            ..sample
        };
        assert_eq!(idle.slot_utilization_percent(), 0.0);
    }
}
