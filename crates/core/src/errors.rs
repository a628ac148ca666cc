use thiserror::Error;
use uuid::Uuid;

/// 控制平面错误类型定义
#[derive(Debug, Error)]
pub enum TaskplaneError {
    #[error("数据库错误: {0}")]
    Database(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: Uuid },

    #[error("任务 {id} 的租约不属于当前Worker或已过期")]
    LeaseNotHeld { id: Uuid },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("失去领导权: {name}")]
    LeadershipLost { name: String },

    #[error("消息队列错误: {0}")]
    Broker(String),

    #[error("消息队列不可用: {0}")]
    BrokerUnavailable(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("任务执行超时")]
    ExecutionTimeout,

    #[error("任务 {id} 正在其他执行槽处理中")]
    TaskInFlight { id: Uuid },

    #[error("准入被拒绝: {0}")]
    Admission(#[from] AdmissionError),

    #[error("指标不可用: {0}")]
    MetricsUnavailable(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),
}

impl From<serde_json::Error> for TaskplaneError {
    fn from(err: serde_json::Error) -> Self {
        TaskplaneError::Serialization(err.to_string())
    }
}

impl TaskplaneError {
    /// 是否为可重试的暂时性错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TaskplaneError::BrokerUnavailable(_)
                | TaskplaneError::Network(_)
                | TaskplaneError::Database(_)
                | TaskplaneError::MetricsUnavailable(_)
        )
    }
}

/// 资源准入拒绝原因
///
/// 由资源准入控制器返回，调用方必须将其记录到日志/指标中，而不是在循环中立即重试。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error(
        "命名空间 {namespace} 的 {resource} 配额不足: 已用 {used} + 申请 {requested} > 上限 {hard}"
    )]
    QuotaExceeded {
        namespace: String,
        resource: String,
        requested: u64,
        used: u64,
        hard: u64,
    },

    #[error("{resource} 取值 {value} 超出允许范围 [{min}, {max}]")]
    LimitOutOfRange {
        resource: String,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("{resource} 的请求值 {request} 大于限制值 {limit}")]
    RequestExceedsLimit {
        resource: String,
        request: u64,
        limit: u64,
    },

    #[error("未知的命名空间: {0}")]
    UnknownNamespace(String),
}

impl AdmissionError {
    /// 用于指标标签的简短原因
    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::QuotaExceeded { .. } => "quota_exceeded",
            AdmissionError::LimitOutOfRange { .. } => "limit_out_of_range",
            AdmissionError::RequestExceedsLimit { .. } => "request_exceeds_limit",
            AdmissionError::UnknownNamespace(_) => "unknown_namespace",
        }
    }
}
