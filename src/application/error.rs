use std::error::Error as StdError;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::upstream::UpstreamError;

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_FOUND: &str = "not_found";
    pub const UPSTREAM: &str = "upstream_error";
    pub const UPSTREAM_UNAVAILABLE: &str = "upstream_unavailable";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("resource not found")]
    NotFound,
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Upstream(error) if error.is_transient() => StatusCode::BAD_GATEWAY,
            AppError::Upstream(UpstreamError::Status { status, .. }) => *status,
            AppError::Upstream(UpstreamError::Decode(_)) => StatusCode::BAD_GATEWAY,
            AppError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => codes::BAD_REQUEST,
            AppError::Unauthorized => codes::UNAUTHORIZED,
            AppError::NotFound => codes::NOT_FOUND,
            AppError::Upstream(error) if error.is_transient() => codes::UPSTREAM_UNAVAILABLE,
            AppError::Upstream(UpstreamError::Status { status, .. })
                if *status == StatusCode::NOT_FOUND =>
            {
                codes::NOT_FOUND
            }
            AppError::Upstream(UpstreamError::Status { status, .. })
                if *status == StatusCode::UNAUTHORIZED =>
            {
                codes::UNAUTHORIZED
            }
            AppError::Upstream(UpstreamError::Status { .. } | UpstreamError::Decode(_)) => {
                codes::UPSTREAM
            }
            AppError::Upstream(_) => codes::INTERNAL,
        }
    }

    /// Message safe to show to clients.
    fn presentation_message(&self) -> String {
        match self {
            AppError::Validation(message) => message.clone(),
            AppError::Unauthorized => "Authentication required".to_string(),
            AppError::NotFound => "Resource not found".to_string(),
            AppError::Upstream(error) if error.is_transient() => {
                "Upstream service unavailable".to_string()
            }
            AppError::Upstream(UpstreamError::Status { message, .. }) => message.clone(),
            AppError::Upstream(UpstreamError::Decode(_)) => {
                "Upstream returned an unexpected response".to_string()
            }
            AppError::Upstream(_) => "Unexpected error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code().to_string(),
                message: self.presentation_message(),
            },
        };
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}
