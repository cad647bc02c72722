//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::db::DatabaseError;
use crate::models::enums::FailureClass;
use crate::pipeline::feedback::FeedbackError;
use crate::pipeline::processor::ProcessingError;
use crate::pipeline::prompts::PromptError;
use crate::pipeline::vault::VaultError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<FailureClass>,
}

/// API-level errors with HTTP status mapping. Messages are user hints and
/// never carry PII or credential values.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Not configured: {0}")]
    NotConfigured(String),
    #[error("Upstream {class} failure: {message}")]
    Upstream { class: FailureClass, message: String },
    #[error("Review required: {0}")]
    ReviewRequired(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unprocessable: {0}")]
    Unprocessable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, class) = match self {
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail, Some(FailureClass::NotFound)),
            ApiError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                detail,
                Some(FailureClass::MalformedRequest),
            ),
            ApiError::NotConfigured(hint) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "NOT_CONFIGURED",
                hint,
                Some(FailureClass::Configuration),
            ),
            ApiError::Upstream { class, message } => (StatusCode::BAD_GATEWAY, "UPSTREAM_FAILURE", message, Some(class)),
            ApiError::ReviewRequired(detail) => (StatusCode::CONFLICT, "REVIEW_REQUIRED", detail, None),
            ApiError::Conflict(detail) => (StatusCode::CONFLICT, "CONFLICT", detail, Some(FailureClass::Transient)),
            ApiError::Unprocessable(detail) => (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_DATA", detail, None),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message, class },
        };
        (status, Json(body)).into_response()
    }
}

impl From<ProcessingError> for ApiError {
    fn from(err: ProcessingError) -> Self {
        let hint = err.user_hint();
        match err {
            ProcessingError::PatientNotFound(_) | ProcessingError::Feedback(FeedbackError::PatientNotFound(_)) => {
                ApiError::NotFound(hint)
            }
            ProcessingError::Feedback(FeedbackError::InvalidRating(_)) => ApiError::BadRequest(hint),
            ProcessingError::Feedback(FeedbackError::Contention { .. }) => ApiError::Conflict(hint),
            ProcessingError::ReviewRequired(_) => ApiError::ReviewRequired(hint),
            ProcessingError::InsufficientData => ApiError::Unprocessable(hint),
            ProcessingError::Configuration(_) => ApiError::NotConfigured(hint),
            ProcessingError::Vault(e) => e.into(),
            ProcessingError::Model(e) if e.class() == FailureClass::Configuration => ApiError::NotConfigured(hint),
            ProcessingError::Model(e) => ApiError::Upstream {
                class: e.class(),
                message: hint,
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Configuration(hint) => ApiError::NotConfigured(hint.to_string()),
            VaultError::NotFound => ApiError::Upstream {
                class: FailureClass::NotFound,
                message: "vault record or token not found".into(),
            },
            other => ApiError::Upstream {
                class: other.class(),
                message: format!("vault request failed ({})", other.class()),
            },
        }
    }
}

impl From<FeedbackError> for ApiError {
    fn from(err: FeedbackError) -> Self {
        ProcessingError::from(err).into()
    }
}

impl From<PromptError> for ApiError {
    fn from(err: PromptError) -> Self {
        match err {
            PromptError::Database(e) => e.into(),
            e @ PromptError::NoCandidates { .. } => ApiError::NotConfigured(e.to_string()),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use uuid::Uuid;

    async fn json_of(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn missing_credential_is_503_with_masked_hint() {
        let err: ApiError = VaultError::Configuration("vault credential missing").into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = json_of(response).await;
        assert_eq!(json["error"]["code"], "NOT_CONFIGURED");
        assert_eq!(json["error"]["message"], "vault credential missing");
        assert_eq!(json["error"]["class"], "configuration");
    }

    #[tokio::test]
    async fn unknown_patient_is_404() {
        let err: ApiError = ProcessingError::PatientNotFound(Uuid::new_v4()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_of(response).await["error"]["message"], "patient not found");
    }

    #[tokio::test]
    async fn invalid_rating_is_400() {
        let err: ApiError = FeedbackError::InvalidRating(9).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn transient_vault_failure_is_502() {
        let err: ApiError = VaultError::Timeout(std::time::Duration::from_secs(30)).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(json_of(response).await["error"]["class"], "transient");
    }

    #[tokio::test]
    async fn internal_hides_details() {
        let response = ApiError::Internal("disk I/O error".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_of(response).await["error"]["message"], "An internal error occurred");
    }
}
