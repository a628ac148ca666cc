use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use taskplane_core::TaskplaneError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("控制平面错误: {0}")]
    Taskplane(#[from] TaskplaneError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,

    #[error("服务不可用: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Taskplane(TaskplaneError::TaskNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "TASK_NOT_FOUND")
            }
            ApiError::Taskplane(TaskplaneError::InvalidTaskParams(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_TASK_PARAMS")
            }
            ApiError::Taskplane(TaskplaneError::Serialization(_)) => {
                (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR")
            }
            ApiError::Taskplane(TaskplaneError::BrokerUnavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "BROKER_UNAVAILABLE")
            }
            ApiError::Taskplane(TaskplaneError::MetricsUnavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "METRICS_UNAVAILABLE")
            }
            ApiError::Taskplane(TaskplaneError::Admission(_)) => {
                (StatusCode::FORBIDDEN, "ADMISSION_REJECTED")
            }
            ApiError::Taskplane(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        if status.is_server_error() {
            tracing::warn!(error = %self, "请求处理失败");
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "message": self.to_string(),
                "type": error_type,
                "code": status.as_u16(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use taskplane_core::AdmissionError;
    use uuid::Uuid;

    #[test]
    fn test_task_not_found_maps_to_404() {
        let error: ApiError = TaskplaneError::TaskNotFound { id: Uuid::new_v4() }.into();
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_invalid_params_maps_to_400() {
        let error: ApiError = TaskplaneError::InvalidTaskParams("empty".to_string()).into();
        assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_broker_unavailable_maps_to_503() {
        let error: ApiError = TaskplaneError::BrokerUnavailable("down".to_string()).into();
        assert_eq!(error.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_admission_rejection_maps_to_403() {
        let error: ApiError = TaskplaneError::Admission(AdmissionError::UnknownNamespace(
            "team-a".to_string(),
        ))
        .into();
        assert_eq!(error.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_other_errors_map_to_500() {
        let error: ApiError = TaskplaneError::Internal("boom".to_string()).into();
        assert_eq!(error.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
