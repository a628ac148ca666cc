use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::routes::AppState;

/// 存活检查：队列可达即返回200
pub async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.liveness().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// 就绪检查：队列可达且至少有一个空闲执行槽
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.readiness().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
