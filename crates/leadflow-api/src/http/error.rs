//! Application error type mapping to HTTP status codes and the envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use leadflow_core::approval::gate::ApprovalError;
use leadflow_core::executor::ExecutorError;
use leadflow_core::orchestrator::OrchestratorError;
use leadflow_core::queue::QueueError;
use leadflow_core::registry::RegistryError;
use leadflow_types::error::{ErrorKind, RepositoryError};
use uuid::Uuid;

use crate::http::response::{ApiErrorDetail, ApiMeta};

#[derive(Debug)]
pub enum AppError {
    /// Any core service failure, classified by its `ErrorKind`.
    Service(OrchestratorError),
    Unauthorized(String),
    Validation(String),
    NotFound(String),
    /// Lost a compare-and-set or the resource is in the wrong state.
    Conflict(String),
    Internal(String),
}

macro_rules! service_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for AppError {
                fn from(e: $ty) -> Self {
                    AppError::Service(e.into())
                }
            }
        )*
    };
}

service_error!(QueueError, RegistryError, ExecutorError, ApprovalError, RepositoryError);

impl From<OrchestratorError> for AppError {
    fn from(e: OrchestratorError) -> Self {
        AppError::Service(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Service(e) => {
                let (status, code) = match e.kind() {
                    ErrorKind::Validation => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                    ErrorKind::Authentication => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
                    ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    ErrorKind::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
                    ErrorKind::ApprovalExpired => (StatusCode::CONFLICT, "APPROVAL_EXPIRED"),
                    ErrorKind::TransientExternal | ErrorKind::PermanentExternal => {
                        (StatusCode::BAD_GATEWAY, "ENGINE_ERROR")
                    }
                    ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
                };
                (status, code, e.to_string())
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        }

        let detail = ApiErrorDetail {
            code: code.to_string(),
            message,
        };
        let body = serde_json::json!({
            "data": null,
            "meta": ApiMeta::now(Uuid::now_v7().to_string(), 0),
            "errors": [detail],
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_errors_map_by_kind() {
        let missing: AppError = ExecutorError::NotFound(Uuid::nil()).into();
        assert_eq!(missing.parts().0, StatusCode::NOT_FOUND);

        let raced: AppError = ExecutorError::Conflict(Uuid::nil()).into();
        assert_eq!(raced.parts().0, StatusCode::CONFLICT);

        let bad: AppError = QueueError::Validation("event type is empty".into()).into();
        let (status, code, message) = bad.parts();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "VALIDATION_ERROR");
        assert!(message.contains("event type"));

        let storage: AppError = RepositoryError::Connection.into();
        assert_eq!(storage.parts().0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn direct_variants_keep_their_status() {
        assert_eq!(
            AppError::Unauthorized("no key".into()).parts().0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::Conflict("taken".into()).parts().0, StatusCode::CONFLICT);
    }
}
