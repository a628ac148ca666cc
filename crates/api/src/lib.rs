//! # Taskplane API
//!
//! 控制平面的HTTP接口，基于Axum构建。
//!
//! ## API 端点
//!
//! - `POST /api/tasks` - 投递任务
//! - `GET /api/tasks/{id}` - 查询任务状态
//! - `GET /metrics` - Prometheus 文本格式指标
//! - `GET /metrics/utilization` - 最新的利用率样本
//! - `GET /health/live` - 存活检查（队列可达）
//! - `GET /health/ready` - 就绪检查（队列可达且有空闲执行槽）
//! - `GET /api/scheduler` - Beat调度器角色与条目状态
//! - `GET /api/autoscaler` - 最近一次扩缩容决策
//! - `GET /api/governor` - 命名空间资源用量

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::net::SocketAddr;

use axum::Router;
use tokio::sync::broadcast;
use tracing::info;

use middleware::{request_logging, trace_layer};
pub use routes::{create_routes, AppState};
use taskplane_core::{TaskplaneError, TaskplaneResult};

/// 创建完整的API应用
pub fn create_app(state: AppState) -> Router {
    create_routes(state)
        .layer(axum::middleware::from_fn(request_logging))
        .layer(trace_layer())
}

/// 启动HTTP服务，收到关闭信号后优雅退出
pub async fn serve(
    bind_address: &str,
    app: Router,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> TaskplaneResult<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| TaskplaneError::Network(format!("无法绑定地址 {bind_address}: {e}")))?;
    let local: Option<SocketAddr> = listener.local_addr().ok();
    info!(address = ?local, "API服务已启动");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| TaskplaneError::Network(format!("API服务异常退出: {e}")))?;

    info!("API服务已停止");
    Ok(())
}
