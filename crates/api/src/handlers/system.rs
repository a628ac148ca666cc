use axum::{extract::State, response::IntoResponse};
use serde::Serialize;

use taskplane_governor::{NamespaceUsage, ResourceQuota};

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

#[derive(Debug, Serialize)]
pub struct NamespaceReport {
    pub usage: NamespaceUsage,
    pub quota: Option<ResourceQuota>,
}

pub async fn scheduler_status(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let handle = state.beat_status.as_ref().ok_or(ApiError::NotFound)?;
    Ok(success(handle.snapshot()))
}

pub async fn autoscaler_status(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let autoscaler = state.autoscaler.as_ref().ok_or(ApiError::NotFound)?;
    Ok(success(autoscaler.last_decision()))
}

/// 各命名空间的已用资源与配额
pub async fn governor_usage(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let reports: Vec<NamespaceReport> = state
        .governor
        .all_usage()
        .into_iter()
        .map(|usage| NamespaceReport {
            quota: state.governor.quota(&usage.namespace),
            usage,
        })
        .collect();
    Ok(success(reports))
}
