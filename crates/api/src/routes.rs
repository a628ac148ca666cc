use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;

use taskplane_dispatcher::{Autoscaler, BeatStatusHandle, TaskSubmitter};
use taskplane_governor::Governor;
use taskplane_infrastructure::MetricsExporter;
use taskplane_worker::HealthCheck;

use crate::handlers::{
    health::{liveness, readiness},
    metrics::{prometheus_metrics, utilization},
    system::{autoscaler_status, governor_usage, scheduler_status},
    tasks::{create_task, get_task},
};

/// API应用状态
///
/// 可选组件在当前进程未启用时为 `None`，对应接口返回404。
#[derive(Clone)]
pub struct AppState {
    pub submitter: Arc<TaskSubmitter>,
    pub health: HealthCheck,
    pub exporter: Arc<MetricsExporter>,
    pub prometheus: Option<PrometheusHandle>,
    pub governor: Governor,
    pub beat_status: Option<BeatStatusHandle>,
    pub autoscaler: Option<Arc<Autoscaler>>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        // 指标
        .route("/metrics", get(prometheus_metrics))
        .route("/metrics/utilization", get(utilization))
        // 任务
        .route("/api/tasks", post(create_task))
        .route("/api/tasks/{id}", get(get_task))
        // 控制平面状态
        .route("/api/scheduler", get(scheduler_status))
        .route("/api/autoscaler", get(autoscaler_status))
        .route("/api/governor", get(governor_usage))
        .with_state(state)
}
