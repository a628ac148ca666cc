use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::{Task, DEFAULT_MAX_RETRIES};
use crate::{TaskplaneError, TaskplaneResult};

/// 固定间隔的上限：100年
pub const MAX_INTERVAL_SECONDS: u64 = 100 * 365 * 24 * 3600;

/// 周期任务的触发节奏
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cadence {
    /// 固定间隔
    Interval { every_seconds: u64 },
    /// CRON表达式（包含秒字段，例如 `0 */5 * * * *`）
    Cron { expression: String },
}

impl Cadence {
    pub fn every_seconds(every_seconds: u64) -> Self {
        Cadence::Interval { every_seconds }
    }

    pub fn cron(expression: impl Into<String>) -> TaskplaneResult<Self> {
        let cadence = Cadence::Cron {
            expression: expression.into(),
        };
        cadence.validate()?;
        Ok(cadence)
    }

    pub fn validate(&self) -> TaskplaneResult<()> {
        match self {
            Cadence::Interval { every_seconds } => interval(*every_seconds).map(|_| ()),
            Cadence::Cron { expression } => parse_cron(expression).map(|_| ()),
        }
    }

    /// 计算严格晚于 `after` 的下一次触发时间
    pub fn next_after(&self, after: DateTime<Utc>) -> TaskplaneResult<DateTime<Utc>> {
        match self {
            Cadence::Interval { every_seconds } => shift(after, interval(*every_seconds)?),
            Cadence::Cron { expression } => {
                let schedule = parse_cron(expression)?;
                schedule
                    .after(&after)
                    .next()
                    .ok_or_else(|| TaskplaneError::InvalidCron {
                        expr: expression.clone(),
                        message: "表达式不会再触发".to_string(),
                    })
            }
        }
    }
}

fn parse_cron(expression: &str) -> TaskplaneResult<Schedule> {
    Schedule::from_str(expression).map_err(|e| TaskplaneError::InvalidCron {
        expr: expression.to_string(),
        message: e.to_string(),
    })
}

fn interval(every_seconds: u64) -> TaskplaneResult<Duration> {
    if every_seconds == 0 || every_seconds > MAX_INTERVAL_SECONDS {
        return Err(TaskplaneError::Configuration(format!(
            "interval cadence must be between 1 and {MAX_INTERVAL_SECONDS} seconds, got {every_seconds}"
        )));
    }
    i64::try_from(every_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| TaskplaneError::Configuration(format!("interval {every_seconds}s is out of range")))
}

fn shift(at: DateTime<Utc>, by: Duration) -> TaskplaneResult<DateTime<Utc>> {
    at.checked_add_signed(by)
        .ok_or_else(|| TaskplaneError::Configuration(format!("schedule time {at} + {by} is out of range")))
}

/// 周期任务定义及其运行进度
///
/// 由Beat调度器持有，只有处于Active状态的实例才会修改它。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub name: String,
    /// 投递到队列时使用的任务名
    pub task_name: String,
    pub args: Value,
    pub cadence: Cadence,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub enabled: bool,
    pub max_retries: u32,
}

impl ScheduleEntry {
    /// 创建新条目，首次触发时间为 `now` 之后的第一个周期点
    pub fn new(
        name: impl Into<String>,
        task_name: impl Into<String>,
        cadence: Cadence,
        now: DateTime<Utc>,
    ) -> TaskplaneResult<Self> {
        cadence.validate()?;
        let next_run = cadence.next_after(now)?;
        Ok(Self {
            name: name.into(),
            task_name: task_name.into(),
            args: Value::Null,
            cadence,
            last_run: None,
            next_run,
            enabled: true,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run <= now
    }

    /// 记录一次触发并推进 `next_run`
    ///
    /// 错过的周期不会补发：`next_run` 直接跳到 `fired_at` 之后的第一个周期点。
    pub fn mark_fired(&mut self, fired_at: DateTime<Utc>) -> TaskplaneResult<()> {
        let next_run = match &self.cadence {
            Cadence::Interval { every_seconds } => {
                let every = interval(*every_seconds)?;
                let mut next = shift(self.next_run, every)?;
                if next <= fired_at {
                    let behind = (fired_at - self.next_run).num_seconds() / every.num_seconds();
                    let skipped = every
                        .num_seconds()
                        .checked_mul(behind + 1)
                        .and_then(Duration::try_seconds)
                        .ok_or_else(|| {
                            TaskplaneError::Configuration(format!("entry '{}' fell too far behind", self.name))
                        })?;
                    next = shift(self.next_run, skipped)?;
                }
                while next <= fired_at {
                    next = shift(next, every)?;
                }
                next
            }
            Cadence::Cron { .. } => self.cadence.next_after(fired_at)?,
        };

        self.last_run = Some(fired_at);
        self.next_run = next_run;
        Ok(())
    }

    /// 生成本周期要投递的任务
    pub fn to_task(&self) -> Task {
        Task::new(self.task_name.clone(), self.args.clone()).with_max_retries(self.max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_interval_entry_first_run_after_one_period() {
        let entry =
            ScheduleEntry::new("update-dashboard-stats", "dashboard.update_stats", Cadence::every_seconds(300), at(10, 0, 0))
                .unwrap();
        assert_eq!(entry.next_run, at(10, 5, 0));
        assert!(!entry.is_due(at(10, 4, 59)));
        assert!(entry.is_due(at(10, 5, 0)));
    }

    #[test]
    fn test_interval_mark_fired_keeps_phase() {
        let mut entry =
            ScheduleEntry::new("stats", "stats", Cadence::every_seconds(300), at(10, 0, 0)).unwrap();
        entry.mark_fired(at(10, 5, 2)).unwrap();
        assert_eq!(entry.last_run, Some(at(10, 5, 2)));
        assert_eq!(entry.next_run, at(10, 10, 0));
    }

    #[test]
    fn test_interval_missed_cycles_are_not_replayed() {
        let mut entry =
            ScheduleEntry::new("stats", "stats", Cadence::every_seconds(300), at(10, 0, 0)).unwrap();
        // 停机一个多小时后才触发
        entry.mark_fired(at(11, 17, 0)).unwrap();
        assert_eq!(entry.next_run, at(11, 20, 0));
        assert!(!entry.is_due(at(11, 17, 0)));
    }

    #[test]
    fn test_oversized_interval_rejected_without_panic() {
        for every_seconds in [MAX_INTERVAL_SECONDS + 1, i64::MAX as u64 / 1000 + 1, i64::MAX as u64, u64::MAX] {
            let cadence = Cadence::every_seconds(every_seconds);
            assert!(matches!(cadence.validate(), Err(TaskplaneError::Configuration(_))));
            assert!(cadence.next_after(at(10, 0, 0)).is_err());
            assert!(ScheduleEntry::new("huge", "huge", cadence, at(10, 0, 0)).is_err());
        }
        assert!(Cadence::every_seconds(MAX_INTERVAL_SECONDS).validate().is_ok());
    }

    #[test]
    fn test_cron_cadence() {
        let cadence = Cadence::cron("0 */15 * * * *").unwrap();
        let mut entry = ScheduleEntry::new("sessions", "sessions.cleanup", cadence, at(9, 1, 0)).unwrap();
        assert_eq!(entry.next_run, at(9, 15, 0));
        entry.mark_fired(at(9, 15, 0)).unwrap();
        assert_eq!(entry.next_run, at(9, 30, 0));
    }

    #[test]
    fn test_invalid_cadence_rejected() {
        assert!(Cadence::cron("not a cron").is_err());
        assert!(Cadence::every_seconds(0).validate().is_err());
    }

    #[test]
    fn test_disabled_entry_never_due() {
        let entry = ScheduleEntry::new("digest", "digest", Cadence::every_seconds(60), at(0, 0, 0))
            .unwrap()
            .with_enabled(false);
        assert!(!entry.is_due(at(23, 0, 0)));
    }

    #[test]
    fn test_cadence_serde_shape() {
        let cadence: Cadence =
            serde_json::from_str(r#"{"kind":"interval","every_seconds":3600}"#).unwrap();
        assert_eq!(cadence, Cadence::every_seconds(3600));
        let cadence: Cadence =
            serde_json::from_str(r#"{"kind":"cron","expression":"0 0 * * * *"}"#).unwrap();
        assert!(matches!(cadence, Cadence::Cron { .. }));
    }
}
