use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::documents::{DeleteError, DownloadError, StatusError, SubmitError};
use crate::application::repos::RepoError;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const NOT_FOUND: &str = "not_found";
    pub const NOT_READY: &str = "not_ready";
    pub const INVALID_TEMPLATE: &str = "invalid_template";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const INTEGRITY: &str = "integrity_error";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const STORAGE: &str = "storage_error";
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Diagnostic attached to error responses so the logging middleware can emit
/// the detail without leaking it to the client.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            hint,
        }
    }

    pub fn bad_request(message: impl Into<String>, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::INTERNAL,
            "Internal server error",
            Some(detail.into()),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = format!(
            "{}: {}",
            self.code,
            self.hint.as_deref().unwrap_or(&self.message)
        );
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message,
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        response.extensions_mut().insert(ErrorDetail(detail));
        response
    }
}

/// Map a repository error to a consistent API response.
pub fn repo_error_to_api(err: RepoError) -> ApiError {
    match err {
        RepoError::NotFound => ApiError::not_found("Resource not found"),
        RepoError::InvalidInput { message } => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_INPUT,
            "Invalid input",
            Some(message),
        ),
        RepoError::Integrity { message } => ApiError::new(
            StatusCode::CONFLICT,
            codes::INTEGRITY,
            "Integrity constraint violated",
            Some(message),
        ),
        RepoError::Timeout => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::DB_TIMEOUT,
            "Database timeout",
            None,
        ),
        RepoError::Persistence(message) => ApiError::internal(message),
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        repo_error_to_api(err)
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::UnsupportedTemplate {
                template_id,
                supported,
            } => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_TEMPLATE,
                format!("Unsupported template `{template_id}`"),
                Some(format!("supported templates: {}", supported.join(", "))),
            ),
            SubmitError::InvalidPayload { message } => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_INPUT,
                message,
                None,
            ),
            SubmitError::Repo(err) => repo_error_to_api(err),
            SubmitError::Storage(err) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::STORAGE,
                "Could not store the submitted payload",
                Some(err.to_string()),
            ),
        }
    }
}

impl From<StatusError> for ApiError {
    fn from(err: StatusError) -> Self {
        match err {
            StatusError::NotFound => ApiError::not_found("Job not found"),
            StatusError::Repo(err) => repo_error_to_api(err),
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(err: DownloadError) -> Self {
        match err {
            DownloadError::NotFound => ApiError::not_found("Job not found"),
            DownloadError::NotReady { status } => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::NOT_READY,
                format!("Job is not completed yet (status: {status})"),
                None,
            ),
            DownloadError::MissingArtifact => {
                ApiError::not_found("Generated document is no longer available")
            }
            DownloadError::Repo(err) => repo_error_to_api(err),
            DownloadError::Storage(err) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::STORAGE,
                "Could not read the generated document",
                Some(err.to_string()),
            ),
        }
    }
}

impl From<DeleteError> for ApiError {
    fn from(err: DeleteError) -> Self {
        match err {
            DeleteError::NotFound => ApiError::not_found("Job not found"),
            DeleteError::Repo(err) => repo_error_to_api(err),
        }
    }
}
