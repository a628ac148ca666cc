//! 控制平面配置
//!
//! 每个组件一个强类型配置段，启动时从TOML文件与环境变量加载，
//! 未识别的键或越界的取值会在启动阶段直接报错。

pub mod validation;

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{
    Cadence, LimitRange, ResourceQuota, ResourceSpec, ScalingBehavior, ScalingPolicy,
    ScalingRule, ScheduleEntry, SelectPolicy, DEFAULT_MAX_RETRIES,
};
use crate::{TaskplaneError, TaskplaneResult};

pub use validation::{ConfigValidator, ValidationUtils};

/// 环境变量前缀，例如 `TASKPLANE__WORKER__CONCURRENCY=8`
pub const ENV_PREFIX: &str = "TASKPLANE";
pub const ENV_SEPARATOR: &str = "__";

const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "config/taskplane.toml",
    "taskplane.toml",
    "/etc/taskplane/config.toml",
];

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub worker: WorkerConfig,
    pub autoscaler: AutoscalerConfig,
    pub beat: BeatConfig,
    pub governor: GovernorConfig,
    pub api: ApiConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Built-in defaults
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: TASKPLANE__)
    pub fn load(config_path: Option<&str>) -> TaskplaneResult<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(TaskplaneError::Configuration(format!(
                    "配置文件不存在: {path}"
                )));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TaskplaneError::Configuration(format!("加载配置失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// 从TOML字符串解析配置（不读取环境变量）
    pub fn from_toml_str(toml: &str) -> TaskplaneResult<Self> {
        let config: AppConfig = ConfigBuilder::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TaskplaneError::Configuration(format!("解析配置失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> TaskplaneResult<()> {
        self.broker.validate()?;
        self.worker.validate()?;
        self.autoscaler.validate()?;
        self.beat.validate()?;
        self.governor.validate()?;
        self.api.validate()?;
        self.observability.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// 仅支持内置的 `memory://` 队列
    pub url: String,
    pub lease_timeout_seconds: u64,
    pub reap_interval_seconds: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "memory://".to_string(),
            lease_timeout_seconds: 30,
            reap_interval_seconds: 5,
        }
    }
}

impl BrokerConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_seconds)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_seconds)
    }
}

impl ConfigValidator for BrokerConfig {
    fn validate(&self) -> TaskplaneResult<()> {
        ValidationUtils::validate_url(&self.url, "broker.url", &["memory"])?;
        ValidationUtils::validate_timeout_seconds(
            self.lease_timeout_seconds,
            "broker.lease_timeout_seconds",
        )?;
        ValidationUtils::validate_positive(self.reap_interval_seconds, "broker.reap_interval_seconds")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub pool: String,
    /// 每个Worker实例的并行执行槽数量
    pub concurrency: usize,
    /// 每个执行槽最多预取的任务数
    pub prefetch_multiplier: usize,
    /// 执行槽处理多少个任务后被回收重建
    pub max_tasks_per_child: u64,
    /// 队列为空时的轮询间隔
    pub poll_interval_ms: u64,
    pub shutdown_timeout_seconds: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// 未启用自动扩缩容时的固定副本数
    pub replicas: u32,
    pub reconcile_interval_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pool: "default".to_string(),
            concurrency: 4,
            prefetch_multiplier: 4,
            max_tasks_per_child: 1000,
            poll_interval_ms: 500,
            shutdown_timeout_seconds: 30,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 60_000,
            replicas: 1,
            reconcile_interval_seconds: 10,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds)
    }

    /// 单个实例最多持有的已租未完成任务数
    pub fn prefetch_limit(&self) -> usize {
        self.concurrency * self.prefetch_multiplier
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> TaskplaneResult<()> {
        ValidationUtils::validate_not_empty(&self.pool, "worker.pool")?;
        ValidationUtils::validate_positive(self.concurrency as u64, "worker.concurrency")?;
        ValidationUtils::validate_positive(
            self.prefetch_multiplier as u64,
            "worker.prefetch_multiplier",
        )?;
        ValidationUtils::validate_positive(self.max_tasks_per_child, "worker.max_tasks_per_child")?;
        ValidationUtils::validate_positive(self.poll_interval_ms, "worker.poll_interval_ms")?;
        ValidationUtils::validate_timeout_seconds(
            self.shutdown_timeout_seconds,
            "worker.shutdown_timeout_seconds",
        )?;
        ValidationUtils::validate_positive(self.retry_base_delay_ms, "worker.retry_base_delay_ms")?;
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(TaskplaneError::Configuration(
                "worker.retry_max_delay_ms must not be less than worker.retry_base_delay_ms"
                    .to_string(),
            ));
        }
        ValidationUtils::validate_positive(self.replicas as u64, "worker.replicas")?;
        ValidationUtils::validate_positive(
            self.reconcile_interval_seconds,
            "worker.reconcile_interval_seconds",
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoscalerConfig {
    pub enabled: bool,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_utilization_percent: f64,
    pub tolerance: f64,
    pub scale_up_stabilization_window_seconds: u64,
    pub scale_down_stabilization_window_seconds: u64,
    pub scale_up_policies: Vec<ScalingRule>,
    pub scale_down_policies: Vec<ScalingRule>,
    pub scale_up_select_policy: SelectPolicy,
    pub scale_down_select_policy: SelectPolicy,
    pub poll_interval_seconds: u64,
    /// 单次拉取指标的超时，需小于轮询间隔
    pub metrics_timeout_seconds: u64,
    /// 远程指标地址；为空时读取进程内的指标导出器
    pub metrics_url: Option<String>,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        let policy = ScalingPolicy::default();
        Self {
            enabled: true,
            min_replicas: policy.min_replicas,
            max_replicas: policy.max_replicas,
            target_utilization_percent: policy.target_utilization_percent,
            tolerance: policy.tolerance,
            scale_up_stabilization_window_seconds: policy.scale_up.stabilization_window_seconds,
            scale_down_stabilization_window_seconds: policy.scale_down.stabilization_window_seconds,
            scale_up_policies: policy.scale_up.policies,
            scale_down_policies: policy.scale_down.policies,
            scale_up_select_policy: policy.scale_up.select_policy,
            scale_down_select_policy: policy.scale_down.select_policy,
            poll_interval_seconds: 15,
            metrics_timeout_seconds: 5,
            metrics_url: None,
        }
    }
}

impl AutoscalerConfig {
    pub fn policy(&self) -> ScalingPolicy {
        ScalingPolicy {
            min_replicas: self.min_replicas,
            max_replicas: self.max_replicas,
            target_utilization_percent: self.target_utilization_percent,
            tolerance: self.tolerance,
            scale_up: ScalingBehavior {
                stabilization_window_seconds: self.scale_up_stabilization_window_seconds,
                select_policy: self.scale_up_select_policy,
                policies: self.scale_up_policies.clone(),
            },
            scale_down: ScalingBehavior {
                stabilization_window_seconds: self.scale_down_stabilization_window_seconds,
                select_policy: self.scale_down_select_policy,
                policies: self.scale_down_policies.clone(),
            },
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn metrics_timeout(&self) -> Duration {
        Duration::from_secs(self.metrics_timeout_seconds)
    }
}

impl ConfigValidator for AutoscalerConfig {
    fn validate(&self) -> TaskplaneResult<()> {
        self.policy().validate()?;
        ValidationUtils::validate_positive(self.poll_interval_seconds, "autoscaler.poll_interval_seconds")?;
        ValidationUtils::validate_positive(
            self.metrics_timeout_seconds,
            "autoscaler.metrics_timeout_seconds",
        )?;
        if self.metrics_timeout_seconds >= self.poll_interval_seconds {
            return Err(TaskplaneError::Configuration(
                "autoscaler.metrics_timeout_seconds must be shorter than poll_interval_seconds"
                    .to_string(),
            ));
        }
        if let Some(url) = &self.metrics_url {
            ValidationUtils::validate_url(url, "autoscaler.metrics_url", &["http", "https"])?;
        }
        Ok(())
    }
}

/// 配置文件中的周期任务定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleEntryConfig {
    pub name: String,
    /// 投递的任务名，缺省与条目名相同
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub every_seconds: Option<u64>,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl ScheduleEntryConfig {
    pub fn interval(name: &str, task_name: &str, every_seconds: u64) -> Self {
        Self {
            name: name.to_string(),
            task_name: Some(task_name.to_string()),
            args: Value::Null,
            every_seconds: Some(every_seconds),
            cron: None,
            enabled: true,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn cadence(&self) -> TaskplaneResult<Cadence> {
        match (self.every_seconds, &self.cron) {
            (Some(every_seconds), None) => {
                let cadence = Cadence::every_seconds(every_seconds);
                cadence.validate()?;
                Ok(cadence)
            }
            (None, Some(expression)) => Cadence::cron(expression.clone()),
            _ => Err(TaskplaneError::Configuration(format!(
                "beat entry '{}' must set exactly one of every_seconds or cron",
                self.name
            ))),
        }
    }

    /// 转换为调度条目，首次触发时间从当前时刻起算
    pub fn to_entry(&self) -> TaskplaneResult<ScheduleEntry> {
        let task_name = self.task_name.clone().unwrap_or_else(|| self.name.clone());
        Ok(
            ScheduleEntry::new(self.name.clone(), task_name, self.cadence()?, Utc::now())?
                .with_args(self.args.clone())
                .with_enabled(self.enabled)
                .with_max_retries(self.max_retries),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BeatConfig {
    pub enabled: bool,
    /// 领导锁的键
    pub scheduler_name: String,
    pub tick_interval_seconds: u64,
    pub lock_ttl_seconds: u64,
    /// Standby状态下重新尝试获取锁的间隔
    pub retry_period_seconds: u64,
    /// `sqlite:` 或 `memory://`
    pub store_url: String,
    pub include_default_entries: bool,
    pub entries: Vec<ScheduleEntryConfig>,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scheduler_name: "taskplane-beat".to_string(),
            tick_interval_seconds: 1,
            lock_ttl_seconds: 15,
            retry_period_seconds: 5,
            store_url: "memory://".to_string(),
            include_default_entries: true,
            entries: Vec::new(),
        }
    }
}

impl BeatConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    pub fn retry_period(&self) -> Duration {
        Duration::from_secs(self.retry_period_seconds)
    }

    /// 内置的周期任务（UTC）
    pub fn default_entries() -> Vec<ScheduleEntryConfig> {
        vec![
            ScheduleEntryConfig::interval("update-dashboard-stats", "dashboard.update_stats", 300),
            ScheduleEntryConfig::interval(
                "cleanup-expired-sessions",
                "sessions.cleanup_expired",
                3600,
            ),
            ScheduleEntryConfig::interval("send-weekly-digest", "digest.send_weekly", 604_800),
        ]
    }

    /// 合并内置条目与配置条目，同名时以配置为准
    pub fn effective_entries(&self) -> TaskplaneResult<Vec<ScheduleEntry>> {
        let mut configs: Vec<ScheduleEntryConfig> = if self.include_default_entries {
            Self::default_entries()
        } else {
            Vec::new()
        };
        for entry in &self.entries {
            configs.retain(|existing| existing.name != entry.name);
            configs.push(entry.clone());
        }
        configs.iter().map(ScheduleEntryConfig::to_entry).collect()
    }
}

impl ConfigValidator for BeatConfig {
    fn validate(&self) -> TaskplaneResult<()> {
        ValidationUtils::validate_not_empty(&self.scheduler_name, "beat.scheduler_name")?;
        ValidationUtils::validate_positive(self.tick_interval_seconds, "beat.tick_interval_seconds")?;
        ValidationUtils::validate_timeout_seconds(self.lock_ttl_seconds, "beat.lock_ttl_seconds")?;
        ValidationUtils::validate_positive(self.retry_period_seconds, "beat.retry_period_seconds")?;
        if self.lock_ttl_seconds <= self.tick_interval_seconds {
            return Err(TaskplaneError::Configuration(
                "beat.lock_ttl_seconds must be longer than beat.tick_interval_seconds".to_string(),
            ));
        }
        ValidationUtils::validate_url(&self.store_url, "beat.store_url", &["sqlite", "memory"])?;

        let mut names = std::collections::HashSet::new();
        for entry in &self.entries {
            ValidationUtils::validate_not_empty(&entry.name, "beat.entries.name")?;
            if !names.insert(entry.name.as_str()) {
                return Err(TaskplaneError::Configuration(format!(
                    "duplicate beat entry '{}'",
                    entry.name
                )));
            }
            entry.cadence()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GovernorConfig {
    pub namespace: String,
    pub quota: ResourceQuota,
    pub limit_range: LimitRange,
    pub worker_resources: ResourceSpec,
    pub scheduler_resources: ResourceSpec,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            quota: ResourceQuota::default(),
            limit_range: LimitRange::default(),
            worker_resources: ResourceSpec::default(),
            scheduler_resources: ResourceSpec::default(),
        }
    }
}

impl ConfigValidator for GovernorConfig {
    fn validate(&self) -> TaskplaneResult<()> {
        ValidationUtils::validate_not_empty(&self.namespace, "governor.namespace")?;
        let range = &self.limit_range;
        if let (Some(min), Some(max)) = (range.min.cpu, range.max.cpu) {
            if min > max {
                return Err(TaskplaneError::Configuration(
                    "governor.limit_range.min.cpu exceeds max.cpu".to_string(),
                ));
            }
        }
        if let (Some(min), Some(max)) = (range.min.memory, range.max.memory) {
            if min > max {
                return Err(TaskplaneError::Configuration(
                    "governor.limit_range.min.memory exceeds max.memory".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl ConfigValidator for ApiConfig {
    fn validate(&self) -> TaskplaneResult<()> {
        ValidationUtils::validate_not_empty(&self.bind_address, "api.bind_address")?;
        self.bind_address
            .parse::<std::net::SocketAddr>()
            .map(|_| ())
            .map_err(|e| {
                TaskplaneError::Configuration(format!(
                    "api.bind_address '{}' is invalid: {e}",
                    self.bind_address
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// `pretty`、`json` 或 `compact`
    pub log_format: String,
    pub metrics_enabled: bool,
    /// 利用率采样间隔
    pub sample_interval_seconds: u64,
    /// 保留的采样点数量
    pub sample_history: usize,
    /// `slots`：按执行槽占用率估算CPU；`process`：读取 /proc 中的进程CPU与内存
    pub utilization_source: String,
}

impl ObservabilityConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_seconds)
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
            sample_interval_seconds: 5,
            sample_history: 120,
            utilization_source: "slots".to_string(),
        }
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> TaskplaneResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(TaskplaneError::Configuration(format!(
                "无效的日志级别: {}，支持: {:?}",
                self.log_level, valid_levels
            )));
        }
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(TaskplaneError::Configuration(format!(
                "无效的日志格式: {}，支持: {:?}",
                self.log_format, valid_formats
            )));
        }
        ValidationUtils::validate_positive(
            self.sample_interval_seconds,
            "observability.sample_interval_seconds",
        )?;
        ValidationUtils::validate_positive(self.sample_history as u64, "observability.sample_history")?;
        let valid_sources = ["slots", "process"];
        if !valid_sources.contains(&self.utilization_source.as_str()) {
            return Err(TaskplaneError::Configuration(format!(
                "无效的利用率来源: {}，支持: {:?}",
                self.utilization_source, valid_sources
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CpuQuantity, PolicyKind};

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker.prefetch_limit(), 16);
        assert_eq!(config.autoscaler.policy(), ScalingPolicy::default());
    }

    #[test]
    fn test_parse_toml_sections() {
        let config = AppConfig::from_toml_str(
            r#"
            [worker]
            concurrency = 8
            prefetch_multiplier = 2

            [autoscaler]
            min_replicas = 2
            max_replicas = 6
            scale_up_policies = [{ kind = "absolute_pods", value = 2, period_seconds = 60 }]

            [governor.quota]
            cpu = "10"
            workers = 8

            [[beat.entries]]
            name = "rebuild-search-index"
            cron = "0 0 3 * * *"
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.concurrency, 8);
        assert_eq!(config.worker.prefetch_limit(), 16);
        let policy = config.autoscaler.policy();
        assert_eq!(policy.min_replicas, 2);
        assert_eq!(policy.scale_up.policies[0].kind, PolicyKind::Pods);
        assert_eq!(config.governor.quota.cpu, Some(CpuQuantity::cores(10)));
        assert_eq!(config.beat.entries.len(), 1);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(AppConfig::from_toml_str("[worker]\nconcurency = 8\n").is_err());
        assert!(AppConfig::from_toml_str("[brokers]\nurl = \"memory://\"\n").is_err());
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        assert!(AppConfig::from_toml_str("[worker]\nconcurrency = 0\n").is_err());
        assert!(AppConfig::from_toml_str("[broker]\nurl = \"amqp://localhost\"\n").is_err());
        assert!(AppConfig::from_toml_str(
            "[autoscaler]\nmin_replicas = 5\nmax_replicas = 3\n"
        )
        .is_err());
        assert!(AppConfig::from_toml_str(
            "[[beat.entries]]\nname = \"both\"\nevery_seconds = 5\ncron = \"0 * * * * *\"\n"
        )
        .is_err());
    }

    #[test]
    fn test_oversized_interval_fails_validation() {
        let result = AppConfig::from_toml_str(
            "[[beat.entries]]\nname = \"huge\"\nevery_seconds = 9223372036854776\n",
        );
        assert!(matches!(result, Err(TaskplaneError::Configuration(_))));
    }

    #[test]
    fn test_effective_entries_override_defaults() {
        let beat = BeatConfig {
            entries: vec![ScheduleEntryConfig::interval(
                "update-dashboard-stats",
                "dashboard.update_stats",
                60,
            )],
            ..BeatConfig::default()
        };
        let entries = beat.effective_entries().unwrap();
        assert_eq!(entries.len(), 3);
        let stats = entries
            .iter()
            .find(|e| e.name == "update-dashboard-stats")
            .unwrap();
        assert_eq!(stats.cadence, Cadence::every_seconds(60));

        let none = BeatConfig {
            include_default_entries: false,
            ..BeatConfig::default()
        };
        assert!(none.effective_entries().unwrap().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskplane.toml");
        std::fs::write(&path, "[api]\nbind_address = \"127.0.0.1:9000\"\n").unwrap();
        let config = AppConfig::load(path.to_str()).unwrap();
        assert_eq!(config.api.bind_address, "127.0.0.1:9000");

        assert!(AppConfig::load(Some("/nonexistent/taskplane.toml")).is_err());
    }
}
