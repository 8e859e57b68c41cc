use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rowgate_interceptor::{BackendError, InterceptError};
use rowgate_policy::PolicyError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Intercept(#[from] InterceptError),

    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn policy_status(err: &PolicyError) -> (StatusCode, &'static str) {
    match err {
        PolicyError::Configuration { .. }
        | PolicyError::InvalidIdentifier(_)
        | PolicyError::InvalidCondition(_)
        | PolicyError::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_POLICY"),
        PolicyError::AuthorizationDenied { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
        PolicyError::DuplicateTable(_) => (StatusCode::CONFLICT, "DUPLICATE_TABLE"),
        PolicyError::TableNotFound(_) => (StatusCode::NOT_FOUND, "TABLE_NOT_FOUND"),
        PolicyError::PolicyLookup { .. } | PolicyError::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        }
    }
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Policy(err) | ApiError::Intercept(InterceptError::Policy(err)) => {
                policy_status(err)
            }
            ApiError::Intercept(InterceptError::Backend(BackendError::UnknownTable(_))) => {
                (StatusCode::NOT_FOUND, "UNKNOWN_TABLE")
            }
            ApiError::Intercept(
                InterceptError::InvalidQuery(_)
                | InterceptError::MissingPayload { .. }
                | InterceptError::Record { .. },
            ) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Intercept(_) | ApiError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = ?self, "Request failed");
            "Internal error".to_string()
        } else {
            self.to_string()
        };
        (
            status,
            Json(json!({ "error": { "code": code, "message": message } })),
        )
            .into_response()
    }
}
