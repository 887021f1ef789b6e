use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::config::Environment;

const GENERIC_MESSAGE: &str = "Something went wrong";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
    #[error("{error}: {message}")]
    Internal { error: &'static str, message: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Logs `source` in full and keeps it out of the response body unless the
    /// service runs in development mode.
    pub fn internal(
        environment: Environment,
        error: &'static str,
        source: &(dyn std::error::Error + 'static),
    ) -> Self {
        tracing::error!(error = %source, "{error}");
        ApiError::Internal {
            error,
            message: client_message(environment, source.to_string()),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub fn client_message(environment: Environment, detail: String) -> String {
    if environment.exposes_error_details() {
        detail
    } else {
        GENERIC_MESSAGE.to_string()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            ApiError::Validation(error) | ApiError::NotFound(error) | ApiError::Conflict(error) => {
                ErrorBody {
                    error: error.to_string(),
                    message: None,
                }
            }
            ApiError::Internal { error, message } => ErrorBody {
                error: error.to_string(),
                message: Some(message),
            },
        };
        (status, Json(body)).into_response()
    }
}
