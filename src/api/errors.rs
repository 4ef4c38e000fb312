use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::errors::GradingError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    PayloadTooLarge(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }

    /// Prefix client-facing messages with the offending batch item.
    pub(crate) fn for_item(self, index: usize) -> Self {
        match self {
            ApiError::BadRequest(message) => ApiError::BadRequest(format!("images[{index}]: {message}")),
            ApiError::PayloadTooLarge(message) => {
                ApiError::PayloadTooLarge(format!("images[{index}]: {message}"))
            }
            other => other,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<GradingError> for ApiError {
    fn from(err: GradingError) -> Self {
        match err {
            GradingError::Validation(_) | GradingError::InvalidImage(_) => {
                ApiError::BadRequest(err.to_string())
            }
            GradingError::InvalidState(_) => ApiError::Conflict(err.to_string()),
            GradingError::OcrEngine(_)
            | GradingError::ResponseFormat(_)
            | GradingError::ScoringService(_) => ApiError::ServiceUnavailable(err.to_string()),
            GradingError::Internal(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match self {
            ApiError::ServiceUnavailable(message) => {
                tracing::error!(error = %message, "Service unavailable");
                message
            }
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                message
            }
            ApiError::BadRequest(message)
            | ApiError::NotFound(message)
            | ApiError::Conflict(message)
            | ApiError::PayloadTooLarge(message) => message,
        };

        (status, Json(ErrorResponse { status: status.as_u16(), detail })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grading_errors_map_to_http_statuses() {
        let cases = [
            (GradingError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (GradingError::InvalidImage("x".into()), StatusCode::BAD_REQUEST),
            (GradingError::InvalidState("busy"), StatusCode::CONFLICT),
            (GradingError::ScoringService("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (GradingError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }
}
