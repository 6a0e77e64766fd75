//! RFC9457-style API error wrapper.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use oxcart_core::CoreError;

use crate::http::constants::{
    PROBLEM_BAD_REQUEST, PROBLEM_INTERNAL, PROBLEM_NOT_FOUND, PROBLEM_SERVICE_UNAVAILABLE,
};
use crate::models::{ProblemDetails, ProblemInvalidParam};

/// Structured API error with optional RFC9457 fields.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    kind: &'static str,
    title: &'static str,
    detail: Option<String>,
    invalid_params: Option<Vec<ProblemInvalidParam>>,
}

impl ApiError {
    const fn new(status: StatusCode, kind: &'static str, title: &'static str) -> Self {
        Self {
            status,
            kind,
            title,
            detail: None,
            invalid_params: None,
        }
    }

    pub(crate) fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn with_invalid_params(mut self, params: Vec<ProblemInvalidParam>) -> Self {
        self.invalid_params = Some(params);
        self
    }

    pub(crate) fn internal(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            PROBLEM_INTERNAL,
            "internal server error",
        )
        .with_detail(detail)
    }

    pub(crate) fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, PROBLEM_BAD_REQUEST, "bad request").with_detail(detail)
    }

    pub(crate) fn not_found(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            PROBLEM_NOT_FOUND,
            "resource not found",
        )
        .with_detail(detail)
    }

    pub(crate) fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            PROBLEM_SERVICE_UNAVAILABLE,
            "service unavailable",
        )
        .with_detail(detail)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownInstance { instance_id } => {
                Self::not_found(format!("no orchestration instance {instance_id}"))
            }
            CoreError::InvalidRequest {
                field,
                reason,
                value,
            } => {
                let message = value.map_or_else(
                    || reason.to_string(),
                    |value| format!("{reason} (got '{value}')"),
                );
                Self::bad_request("request validation failed").with_invalid_params(vec![
                    ProblemInvalidParam {
                        pointer: format!("/{field}"),
                        message,
                    },
                ])
            }
            unavailable @ (CoreError::Io { .. } | CoreError::CorruptCheckpoint { .. }) => {
                tracing::error!(
                    error = %unavailable,
                    request_id = ?oxcart_telemetry::current_request_id(),
                    "checkpoint store unavailable"
                );
                Self::service_unavailable("checkpoint store unavailable")
            }
            other => {
                tracing::error!(
                    error = %other,
                    request_id = ?oxcart_telemetry::current_request_id(),
                    "request failed with engine error"
                );
                Self::internal("orchestration engine error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ProblemDetails {
            kind: self.kind.to_string(),
            title: self.title.to_string(),
            status: self.status.as_u16(),
            detail: self.detail,
            invalid_params: self.invalid_params,
        };
        (self.status, Json(body)).into_response()
    }
}
