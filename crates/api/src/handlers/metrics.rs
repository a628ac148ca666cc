use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::{
    error::{ApiError, ApiResult},
    routes::AppState,
};

/// Prometheus 文本格式
pub async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => ApiError::NotFound.into_response(),
    }
}

/// 最新的利用率样本，尚未采样时立即采集一次
///
/// 直接返回样本本身，远端自动扩缩容控制器按此格式读取。
pub async fn utilization(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let sample = match state.exporter.latest().await {
        Some(sample) => sample,
        None => state.exporter.collect().await?,
    };
    Ok(Json(sample))
}
