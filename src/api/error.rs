use crate::services::executor::ExecutorError;
use crate::utils::validation::ValidationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Service Unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Gateway Timeout: {0}")]
    GatewayTimeout(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        match e.code {
            "FILE_TOO_LARGE" => AppError::PayloadTooLarge(e.message),
            _ => AppError::BadRequest(e.message),
        }
    }
}

impl From<ExecutorError> for AppError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::Timeout { .. } => AppError::GatewayTimeout(e.to_string()),
            ExecutorError::Shutdown | ExecutorError::UnknownJob(_) => {
                AppError::ServiceUnavailable(e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::ServiceUnavailable(msg) => {
                tracing::warn!("Service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            AppError::GatewayTimeout(msg) => {
                tracing::warn!("Job timed out: {}", msg);
                (StatusCode::GATEWAY_TIMEOUT, msg)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (AppError::PayloadTooLarge("x".into()), StatusCode::PAYLOAD_TOO_LARGE),
            (AppError::ServiceUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::GatewayTimeout("x".into()), StatusCode::GATEWAY_TIMEOUT),
            (AppError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_executor_timeout_is_distinct() {
        let err: AppError = ExecutorError::Timeout {
            job_id: Uuid::new_v4(),
            duration: Duration::from_secs(1),
        }
        .into();
        assert!(matches!(err, AppError::GatewayTimeout(_)));

        let err: AppError = ExecutorError::Shutdown.into();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
    }

    #[test]
    fn test_validation_error_mapping() {
        let err: AppError = ValidationError {
            code: "FILE_TOO_LARGE",
            message: "too big".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));

        let err: AppError = ValidationError {
            code: "INVALID_FILENAME",
            message: "empty".to_string(),
        }
        .into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
