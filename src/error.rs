use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::validation::ValidationErrors;

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden: {0}")]
    Forbidden(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("This poll is not currently active")]
    PollInactive,
    #[error("Invalid option index")]
    InvalidOption,
    #[error("You have already voted on this poll")]
    AlreadyVoted,
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("Storage unavailable: {0}")]
    ServiceUnavailable(String),
}

impl PollError {
    /// Stable, client-facing message for each error kind.
    pub fn message(&self) -> &'static str {
        match self {
            PollError::Unauthorized => "Unauthorized",
            PollError::Forbidden(_) => "Forbidden",
            PollError::NotFound(_) => "Not found",
            PollError::PollInactive => "Poll is not currently active",
            PollError::InvalidOption => "Invalid option index",
            PollError::AlreadyVoted => "Already voted on this poll",
            PollError::Validation(_) => "Validation error",
            PollError::ServiceUnavailable(_) => "Service unavailable",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            PollError::Unauthorized => StatusCode::UNAUTHORIZED,
            PollError::Forbidden(_) => StatusCode::FORBIDDEN,
            PollError::NotFound(_) => StatusCode::NOT_FOUND,
            PollError::PollInactive => StatusCode::BAD_REQUEST,
            PollError::InvalidOption => StatusCode::BAD_REQUEST,
            PollError::AlreadyVoted => StatusCode::CONFLICT,
            PollError::Validation(_) => StatusCode::BAD_REQUEST,
            PollError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = match &self {
            PollError::Validation(errors) => json!({
                "error": self.message(),
                "details": self.to_string(),
                "violations": errors.violations(),
            }),
            // Storage internals stay in the logs.
            PollError::ServiceUnavailable(cause) => {
                error!("storage failure: {}", cause);
                json!({
                    "error": self.message(),
                    "details": "The storage backend is unavailable, retry later",
                })
            }
            _ => json!({
                "error": self.message(),
                "details": self.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for PollError {
    fn from(error: sqlx::Error) -> Self {
        PollError::ServiceUnavailable(error.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for PollError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        PollError::Unauthorized
    }
}

impl From<ValidationErrors> for PollError {
    fn from(errors: ValidationErrors) -> Self {
        PollError::Validation(errors)
    }
}

impl From<JsonRejection> for PollError {
    fn from(rejection: JsonRejection) -> Self {
        ValidationErrors::single("body", rejection.body_text()).into()
    }
}

impl From<PathRejection> for PollError {
    fn from(rejection: PathRejection) -> Self {
        ValidationErrors::single("path", rejection.body_text()).into()
    }
}

impl From<QueryRejection> for PollError {
    fn from(rejection: QueryRejection) -> Self {
        ValidationErrors::single("query", rejection.body_text()).into()
    }
}
