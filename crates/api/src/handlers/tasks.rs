use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use taskplane_core::DEFAULT_MAX_RETRIES;

use crate::{
    error::ApiResult,
    response::{created, success},
    routes::AppState,
};

/// 任务投递请求
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTaskRequest {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub eta: Option<DateTime<Utc>>,
    pub max_retries: Option<u32>,
    pub priority: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub id: Uuid,
}

/// 投递任务
pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = state
        .submitter
        .submit(
            &request.name,
            request.args,
            request.eta,
            request.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            request.priority.unwrap_or(0),
        )
        .await?;
    Ok(created(CreateTaskResponse { id }))
}

/// 查询任务
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let task = state.submitter.status(id).await?;
    Ok(success(task))
}
