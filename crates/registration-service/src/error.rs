//! Error types for the registration service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use registration_core::{Requirement, WorkflowError};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Service error types.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("Registration not found: {0}")]
    NotFound(Uuid),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<Requirement>>,
}

impl ServiceError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ServiceError::Workflow(e) => match e {
                WorkflowError::InvalidPhoneNumber(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_PHONE_NUMBER")
                }
                WorkflowError::InvalidImage(_) => (StatusCode::BAD_REQUEST, "INVALID_IMAGE"),
                WorkflowError::InvalidCode(_) => (StatusCode::BAD_REQUEST, "INVALID_CODE"),
                WorkflowError::DocumentMissing => (StatusCode::CONFLICT, "DOCUMENT_MISSING"),
                WorkflowError::NoActiveCode => (StatusCode::CONFLICT, "NO_ACTIVE_CODE"),
                WorkflowError::CodeExpired => (StatusCode::GONE, "CODE_EXPIRED"),
                WorkflowError::CodeSuperseded => (StatusCode::CONFLICT, "CODE_SUPERSEDED"),
                WorkflowError::AlreadySubmitted => (StatusCode::CONFLICT, "ALREADY_SUBMITTED"),
                WorkflowError::RegistrationIncomplete { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "REGISTRATION_INCOMPLETE")
                }
                WorkflowError::ComparisonCancelled => {
                    (StatusCode::CONFLICT, "COMPARISON_CANCELLED")
                }
                WorkflowError::StaleComparison => (StatusCode::CONFLICT, "STALE_COMPARISON"),
                WorkflowError::MatcherUnavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "MATCHER_UNAVAILABLE")
                }
                WorkflowError::DeliveryFailed(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "DELIVERY_FAILED")
                }
                WorkflowError::ArchiveFailed(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "ARCHIVE_FAILED")
                }
            },
            ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ServiceError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ServiceError::RateLimitExceeded => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED")
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let missing = match &self {
            ServiceError::Workflow(WorkflowError::RegistrationIncomplete { missing }) => {
                Some(missing.clone())
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            missing,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(err: ServiceError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_incomplete_lists_missing() {
        let err = ServiceError::from(WorkflowError::RegistrationIncomplete {
            missing: vec![Requirement::PhoneVerification, Requirement::BiometricMatch],
        });

        let (status, json) = render(err).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["code"], "REGISTRATION_INCOMPLETE");
        assert_eq!(
            json["missing"],
            serde_json::json!(["phone_verification", "biometric_match"])
        );
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (WorkflowError::InvalidImage("empty".into()), StatusCode::BAD_REQUEST),
            (WorkflowError::InvalidCode("expected 6 digits".into()), StatusCode::BAD_REQUEST),
            (WorkflowError::DocumentMissing, StatusCode::CONFLICT),
            (WorkflowError::CodeExpired, StatusCode::GONE),
            (WorkflowError::MatcherUnavailable("down".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, expected) in cases {
            let (status, json) = render(err.into()).await;
            assert_eq!(status, expected);
            assert!(json.get("missing").is_none());
        }
    }

    #[tokio::test]
    async fn test_not_found() {
        let (status, json) = render(ServiceError::NotFound(Uuid::nil())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "NOT_FOUND");
    }
}
